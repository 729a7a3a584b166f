//! Command-line arguments for the chat binary.
//!
//! Arguments are parsed via `arrrg`; the handle to start as is the single
//! free argument.

use std::path::PathBuf;

use arrrg_derive::CommandLine;

use crate::config::DEFAULT_CONFIG_FILE;

/// Command-line arguments for the slcp-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Path of the configuration file.
    #[arrrg(optional, "Configuration file (default: config.toml)", "PATH")]
    pub config: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Log protocol traffic to stderr.
    #[arrrg(flag, "Log protocol traffic to stderr")]
    pub verbose: bool,
}

/// Resolved front-end options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOptions {
    /// The configuration file to load and save.
    pub config_path: PathBuf,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Whether debug logging is enabled.
    pub verbose: bool,
}

impl ChatOptions {
    /// Options with default values.
    pub fn new() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            use_color: true,
            verbose: false,
        }
    }

    /// The `tracing` filter directive matching these options.
    pub fn log_directive(&self) -> &'static str {
        if self.verbose { "slcp=debug" } else { "slcp=warn" }
    }
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatOptions {
    fn from(args: ChatArgs) -> Self {
        ChatOptions {
            config_path: args
                .config
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
            use_color: !args.no_color,
            verbose: args.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_default_args() {
        let options = ChatOptions::from(ChatArgs::default());
        assert_eq!(options, ChatOptions::new());
        assert_eq!(options.config_path, PathBuf::from("config.toml"));
        assert_eq!(options.log_directive(), "slcp=warn");
    }

    #[test]
    fn options_from_custom_args() {
        let args = ChatArgs {
            config: Some("/etc/slcp.toml".to_string()),
            no_color: true,
            verbose: true,
        };
        let options = ChatOptions::from(args);
        assert_eq!(options.config_path, PathBuf::from("/etc/slcp.toml"));
        assert!(!options.use_color);
        assert_eq!(options.log_directive(), "slcp=debug");
    }
}
