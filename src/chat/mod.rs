//! Terminal front end for the chat client.
//!
//! # Architecture
//!
//! - [`config`]: command-line arguments and resolved options
//! - [`commands`]: prompt command parsing
//! - [`render`]: timestamped terminal output
//! - [`session`]: glue between the prompt, the renderer and the network service

mod commands;
mod config;
mod render;
mod session;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatOptions};
pub use render::{PlainTextRenderer, Renderer};
pub use session::{ChatSession, Direction, SessionControl, TranscriptEntry};
