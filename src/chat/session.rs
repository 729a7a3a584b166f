//! Core chat session management.
//!
//! `ChatSession` sits between the prompt and the network service: it turns
//! parsed commands into [`NetCommand`]s, renders [`NetEvent`]s, keeps the
//! transcript and persists configuration edits.

use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::to_writer_pretty;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::Error;
use crate::chat::commands::{ChatCommand, help_text};
use crate::chat::render::Renderer;
use crate::config::{ClientConfig, ConfigFile};
use crate::error::Result;
use crate::network::{NetCommand, NetEvent};
use crate::peers::PeerTable;
use crate::protocol::BROADCAST_HANDLE;

/// What the prompt loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// Keep reading input.
    Continue,
    /// The session has left the chat; stop reading input.
    Exit,
}

/// Direction of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Received from a peer.
    Incoming,
    /// Sent by this client.
    Outgoing,
}

/// One line of the chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// When the entry was recorded.
    #[serde(with = "crate::utils::time")]
    pub at: OffsetDateTime,
    /// Whether the entry was sent or received.
    pub direction: Direction,
    /// The other party (a handle or `ALL`).
    pub peer: String,
    /// Message text, or the image path for image transfers.
    pub body: String,
    /// True for image transfers.
    #[serde(default)]
    pub image: bool,
}

/// A chat session bound to one configured client.
pub struct ChatSession {
    running: ClientConfig,
    config_file: ConfigFile,
    config_index: usize,
    config_path: PathBuf,
    local_ip: IpAddr,
    peers: PeerTable,
    commands: mpsc::UnboundedSender<NetCommand>,
    away: bool,
    announced: HashSet<String>,
    departed: HashSet<String>,
    transcript: Vec<TranscriptEntry>,
}

impl ChatSession {
    /// Creates a session for the client named `handle` in `config_file`.
    pub fn new(
        config_file: ConfigFile,
        handle: &str,
        config_path: PathBuf,
        local_ip: IpAddr,
        peers: PeerTable,
        commands: mpsc::UnboundedSender<NetCommand>,
    ) -> Result<Self> {
        let config_index = config_file.position(handle)?;
        let running = config_file.clients[config_index].clone();
        running.validate()?;
        Ok(Self {
            running,
            config_file,
            config_index,
            config_path,
            local_ip,
            peers,
            commands,
            away: false,
            announced: HashSet::new(),
            departed: HashSet::new(),
            transcript: Vec::new(),
        })
    }

    /// The configuration this session was started with.
    ///
    /// Edits made with `set` do not change it until the next start.
    pub fn config(&self) -> &ClientConfig {
        &self.running
    }

    /// The configuration as saved in the configuration file.
    pub fn saved_config(&self) -> &ClientConfig {
        &self.config_file.clients[self.config_index]
    }

    /// This client's handle.
    pub fn handle(&self) -> &str {
        &self.config().handle
    }

    /// This client's chat address as seen by peers.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.local_ip, self.config().chat_port()?))
    }

    /// Whether AFK mode is on.
    pub fn is_away(&self) -> bool {
        self.away
    }

    /// The transcript recorded so far.
    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Executes one prompt command.
    pub fn execute(&mut self, command: ChatCommand, renderer: &mut dyn Renderer) -> SessionControl {
        match command {
            ChatCommand::Msg { to, text } => {
                if to != BROADCAST_HANDLE && self.peers.get(&to).is_none() {
                    renderer.print_error(&format!("Unknown client: {to}. Type 'clients' to list."));
                } else if self.send(NetCommand::Msg {
                    to: to.clone(),
                    text: text.clone(),
                }) {
                    renderer.print_sent(&to, &text);
                    self.record(Direction::Outgoing, to, text, false);
                } else {
                    renderer.print_error("network service is not running");
                }
            }
            ChatCommand::Img { to, path } => {
                if !path.is_file() {
                    renderer.print_error(&format!("File not found: {}", path.display()));
                } else if self.peers.get(&to).is_none() {
                    renderer.print_error(&format!("Unknown client: {to}. Type 'clients' to list."));
                } else if !self.send(NetCommand::Img { to, path }) {
                    renderer.print_error("network service is not running");
                }
            }
            ChatCommand::Clients => {
                renderer.print_clients(&self.peers.others(self.handle()));
            }
            ChatCommand::WhoAmI => match self.local_addr() {
                Ok(addr) => renderer.print_info(&format!(
                    "You: {} ({addr}){}",
                    self.handle(),
                    if self.away { " [AFK]" } else { "" }
                )),
                Err(err) => renderer.print_error(&err.to_string()),
            },
            ChatCommand::Afk(away) => {
                self.away = away;
                self.send(NetCommand::Afk(away));
                renderer.print_info(&format!("[AFK] set to {}", if away { "ON" } else { "OFF" }));
            }
            ChatCommand::Set { key, value } => match self.apply_setting(&key, &value) {
                Ok(()) => renderer.print_info(&format!(
                    "{key} saved to {}. Restart to apply.",
                    self.config_path.display()
                )),
                Err(err) => renderer.print_error(&err.to_string()),
            },
            ChatCommand::SaveTranscript(path) => match self.save_transcript_to(&path) {
                Ok(()) => renderer.print_info(&format!("Transcript saved to {path}")),
                Err(err) => renderer.print_error(&format!("Failed to save transcript: {err}")),
            },
            ChatCommand::Help => {
                for line in help_text().lines() {
                    renderer.print_info(line);
                }
            }
            ChatCommand::Leave => {
                renderer.print_info("Sending LEAVE...");
                self.leave();
                return SessionControl::Exit;
            }
            ChatCommand::Invalid(message) => renderer.print_error(&message),
        }
        SessionControl::Continue
    }

    /// Renders one event from the network service.
    pub fn apply_event(&mut self, event: NetEvent, renderer: &mut dyn Renderer) {
        match event {
            NetEvent::Msg { from, to, text } => {
                renderer.print_message(&from, &to, &text);
                self.record(Direction::Incoming, from, text, false);
            }
            NetEvent::Img { from, path } => {
                renderer.print_image(&from, &path);
                self.record(Direction::Incoming, from, path.display().to_string(), true);
            }
            NetEvent::ImgSent { to, path } => {
                renderer.print_image_sent(&to, &path);
                self.record(Direction::Outgoing, to, path.display().to_string(), true);
            }
            NetEvent::Leave { handle } => {
                self.peers.remove(&handle);
                self.announced.remove(&handle);
                if self.departed.insert(handle.clone()) {
                    renderer.print_leave(&handle);
                }
            }
            NetEvent::Error { message } => renderer.print_error(&message),
        }
    }

    /// Announces peers that appeared since the last call.
    pub fn poll_joins(&mut self, renderer: &mut dyn Renderer) {
        let current: HashSet<String> = self
            .peers
            .others(self.handle())
            .into_iter()
            .map(|peer| peer.handle)
            .collect();
        self.announced.retain(|handle| current.contains(handle));
        let mut newcomers: Vec<_> = current
            .into_iter()
            .filter(|handle| !self.announced.contains(handle))
            .collect();
        newcomers.sort();
        for handle in newcomers {
            self.departed.remove(&handle);
            renderer.print_join(&handle);
            self.announced.insert(handle);
        }
    }

    /// Sends `LEAVE` to every peer and stops the network service.
    pub fn leave(&mut self) {
        self.send(NetCommand::Leave);
        self.send(NetCommand::Exit);
    }

    /// Edits one setting of this client and writes the configuration file.
    pub fn apply_setting(&mut self, key: &str, value: &str) -> Result<()> {
        let mut edited = self.saved_config().clone();
        edited.apply_setting(key, value)?;
        let mut file = self.config_file.clone();
        file.update_client(self.config_index, edited)?;
        file.save(&self.config_path)?;
        self.config_file = file;
        Ok(())
    }

    /// Saves the transcript to the specified path.
    pub fn save_transcript_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let transcript = TranscriptFile {
            version: 1,
            handle: self.handle().to_string(),
            entries: self.transcript.clone(),
        };
        let file = File::create(path.as_ref())
            .map_err(|err| Error::io("failed to create transcript file", err))?;
        let writer = BufWriter::new(file);
        to_writer_pretty(writer, &transcript).map_err(|err| {
            Error::serialization("failed to serialize transcript", Some(Box::new(err)))
        })
    }

    fn send(&self, command: NetCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    fn record(&mut self, direction: Direction, peer: String, body: String, image: bool) {
        self.transcript.push(TranscriptEntry {
            at: crate::utils::time::now(),
            direction,
            peer,
            body,
            image,
        });
    }
}

#[derive(Serialize, Deserialize)]
struct TranscriptFile {
    version: u8,
    handle: String,
    entries: Vec<TranscriptEntry>,
}
