//! Interactive LAN chat client speaking SLCP.
//!
//! # Usage
//!
//! ```bash
//! # Start as the client named Alice in ./config.toml
//! slcp-chat Alice
//!
//! # Use another configuration file and log protocol traffic
//! slcp-chat --config lab.toml --verbose Bob
//!
//! # Disable colors (useful for piping output)
//! slcp-chat --no-color Carol
//! ```
//!
//! # Commands
//!
//! - `msg <handle|ALL> <text>` - Send a message
//! - `img <handle> <path>` - Send an image
//! - `clients` - List known clients
//! - `afk on|off` - Toggle away mode
//! - `leave` - Leave the chat and exit

use std::process::ExitCode;
use std::time::Duration;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use slcp::chat::{
    ChatArgs, ChatOptions, ChatSession, PlainTextRenderer, Renderer, SessionControl,
    parse_command,
};
use slcp::discovery::local_ip;
use slcp::{ConfigFile, Discovery, NetworkService, PeerTable};

const USAGE: &str = "slcp-chat [OPTIONS] <HANDLE>";

/// How often newly discovered peers are announced at the prompt.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Main entry point for the slcp-chat application.
#[tokio::main]
async fn main() -> ExitCode {
    let (args, free) = ChatArgs::from_command_line_relaxed(USAGE);
    let options = ChatOptions::from(args);
    init_tracing(&options);
    slcp::register_biometrics(biometrics::Collector::new());

    let config_file = match ConfigFile::load(&options.config_path) {
        Ok(config_file) => config_file,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    let Some(handle) = free.first() else {
        print_usage(&config_file);
        return ExitCode::FAILURE;
    };
    if free.len() > 1 {
        print_usage(&config_file);
        return ExitCode::FAILURE;
    }

    match run(options, config_file, handle).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(options: &ChatOptions) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage(config_file: &ConfigFile) {
    eprintln!("USAGE: {USAGE}");
    eprintln!("Available handles: {}", config_file.handles().join(", "));
}

async fn run(
    options: ChatOptions,
    config_file: ConfigFile,
    handle: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = config_file.client(handle)?.clone();
    config.validate()?;
    std::fs::create_dir_all(&config.imagepath)?;

    let peers = PeerTable::new();
    let shutdown = CancellationToken::new();
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();

    let network = NetworkService::bind(&config, peers.clone(), events_tx).await?;
    let discovery = Discovery::bind(&config, peers.clone()).await?;
    if !discovery.is_responder() {
        tracing::info!("another client answers WHO on port {}", config.whoisport);
    }
    let network_task = tokio::spawn(network.run(commands_rx, shutdown.child_token()));
    let discovery_task = tokio::spawn(discovery.run(shutdown.clone()));

    let mut session = ChatSession::new(
        config_file,
        handle,
        options.config_path.clone(),
        local_ip(),
        peers,
        commands_tx,
    )?;
    let mut renderer = PlainTextRenderer::with_color(options.use_color);

    let interrupted = CancellationToken::new();
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.cancel();
    })?;

    println!(
        "SLCP chat as {} ({})",
        session.handle(),
        session.local_addr()?
    );
    println!("Type 'help' for commands, 'leave' to exit\n");

    let mut lines = spawn_prompt(format!("{}> ", session.handle()));
    let mut ticker = tokio::time::interval(JOIN_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = interrupted.cancelled() => {
                session.leave();
                break;
            }
            line = lines.recv() => {
                let Some(line) = line else {
                    session.leave();
                    break;
                };
                let Some(command) = parse_command(&line) else {
                    continue;
                };
                if session.execute(command, &mut renderer) == SessionControl::Exit {
                    break;
                }
            }
            event = events.recv() => match event {
                Some(event) => session.apply_event(event, &mut renderer),
                None => {
                    renderer.print_error("network service stopped");
                    break;
                }
            },
            _ = ticker.tick() => session.poll_joins(&mut renderer),
        }
    }

    // The network service exits after sending LEAVE.
    if let Err(err) = network_task.await? {
        tracing::warn!("network service failed: {err}");
    }
    shutdown.cancel();
    if let Err(err) = discovery_task.await? {
        tracing::warn!("discovery failed: {err}");
    }
    println!("Goodbye!");
    Ok(())
}

/// Reads prompt lines on a dedicated thread.
///
/// The channel closes on end of input or Ctrl+C at the prompt.
fn spawn_prompt(prompt: String) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(err) => {
                eprintln!("failed to start line editor: {err}");
                return;
            }
        };
        loop {
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(line);
                    if tx.send(line.to_string()).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("Error: {err}");
                    break;
                }
            }
        }
    });
    rx
}
