//! Output rendering for the chat application.
//!
//! This module provides a trait-based rendering abstraction. The default
//! implementation prefixes every line with a `[HH:MM:SS]` timestamp and uses
//! ANSI colors to tell incoming messages, images and departures apart.

use std::io::{self, Stdout, Write};
use std::path::Path;

use crate::peers::Peer;
use crate::utils::time::{clock, now};

/// ANSI escape code for green text (used for messages and joins).
const ANSI_GREEN: &str = "\x1b[92m";

/// ANSI escape code for yellow text (used for images).
const ANSI_YELLOW: &str = "\x1b[93m";

/// ANSI escape code for red text (used for departures and errors).
const ANSI_RED: &str = "\x1b[91m";

/// ANSI escape code for dim text (used for local echoes).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print an incoming text message.
    fn print_message(&mut self, from: &str, to: &str, text: &str);

    /// Print a received image.
    fn print_image(&mut self, from: &str, path: &Path);

    /// Echo a message this client sent.
    fn print_sent(&mut self, to: &str, text: &str);

    /// Echo an image offer this client sent.
    fn print_image_sent(&mut self, to: &str, path: &Path);

    /// Announce a newly discovered peer.
    fn print_join(&mut self, handle: &str);

    /// Announce that a peer left.
    fn print_leave(&mut self, handle: &str);

    /// Print the list of other clients.
    fn print_clients(&mut self, peers: &[Peer]);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer<W: Write + Send = Stdout> {
    out: W,
    use_color: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            out: io::stdout(),
            use_color,
        }
    }
}

impl<W: Write + Send> PlainTextRenderer<W> {
    /// Creates a renderer writing to `out`.
    pub fn with_writer(out: W, use_color: bool) -> Self {
        Self { out, use_color }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, color: &str, text: &str) {
        let stamp = clock(now());
        let _ = if self.use_color {
            writeln!(self.out, "{color}{stamp} {text}{ANSI_RESET}")
        } else {
            writeln!(self.out, "{stamp} {text}")
        };
        let _ = self.out.flush();
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> Renderer for PlainTextRenderer<W> {
    fn print_message(&mut self, from: &str, to: &str, text: &str) {
        if to == crate::protocol::BROADCAST_HANDLE {
            self.line(ANSI_GREEN, &format!("[{from} -> all] {text}"));
        } else {
            self.line(ANSI_GREEN, &format!("[{from}] {text}"));
        }
    }

    fn print_image(&mut self, from: &str, path: &Path) {
        self.line(
            ANSI_YELLOW,
            &format!("[{from}] sent image -> {}", path.display()),
        );
    }

    fn print_sent(&mut self, to: &str, text: &str) {
        self.line(ANSI_DIM, &format!("[SEND] to {to}: {text}"));
    }

    fn print_image_sent(&mut self, to: &str, path: &Path) {
        self.line(ANSI_DIM, &format!("[SEND IMG] to {to}: {}", path.display()));
    }

    fn print_join(&mut self, handle: &str) {
        self.line(ANSI_GREEN, &format!("{handle} joined the chat."));
    }

    fn print_leave(&mut self, handle: &str) {
        self.line(ANSI_RED, &format!("[{handle}] left the chat."));
    }

    fn print_clients(&mut self, peers: &[Peer]) {
        if peers.is_empty() {
            let _ = writeln!(self.out, "No other clients found.");
        } else {
            let _ = writeln!(self.out, "Active clients:");
            for peer in peers {
                let _ = writeln!(self.out, "  {peer}");
            }
        }
        let _ = self.out.flush();
    }

    fn print_error(&mut self, error: &str) {
        if self.use_color {
            let _ = writeln!(self.out, "{ANSI_RED}[ERROR] {error}{ANSI_RESET}");
        } else {
            let _ = writeln!(self.out, "[ERROR] {error}");
        }
        let _ = self.out.flush();
    }

    fn print_info(&mut self, info: &str) {
        let _ = writeln!(self.out, "{info}");
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render<F: FnOnce(&mut PlainTextRenderer<Vec<u8>>)>(use_color: bool, f: F) -> String {
        let mut renderer = PlainTextRenderer::with_writer(Vec::new(), use_color);
        f(&mut renderer);
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color);
    }

    #[test]
    fn message_line_has_timestamp() {
        let out = render(false, |r| r.print_message("Bob", "Alice", "hi"));
        assert!(out.starts_with('['));
        assert_eq!(&out[10..], " [Bob] hi\n");
    }

    #[test]
    fn broadcast_message_is_marked() {
        let out = render(false, |r| r.print_message("Bob", "ALL", "[AFK] Bob is now away"));
        assert!(out.ends_with("[Bob -> all] [AFK] Bob is now away\n"));
    }

    #[test]
    fn colors_can_be_disabled() {
        let plain = render(false, |r| r.print_leave("Bob"));
        assert!(!plain.contains('\x1b'));
        let colored = render(true, |r| r.print_leave("Bob"));
        assert!(colored.starts_with(ANSI_RED));
        assert!(colored.ends_with("[Bob] left the chat.\x1b[0m\n"));
    }

    #[test]
    fn client_list() {
        let out = render(false, |r| r.print_clients(&[]));
        assert_eq!(out, "No other clients found.\n");
        let bob = Peer::new("Bob", "10.0.0.2".parse().unwrap(), 5001);
        let out = render(false, |r| r.print_clients(&[bob]));
        assert_eq!(out, "Active clients:\n  Bob (10.0.0.2:5001)\n");
    }
}
