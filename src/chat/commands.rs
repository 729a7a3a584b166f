//! Command parsing for the chat prompt.
//!
//! Every line typed at the prompt is a command. A leading `/` is accepted
//! and the verb is case-insensitive.

use std::path::PathBuf;

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Send a text message to a handle (or `ALL`).
    Msg { to: String, text: String },

    /// Send an image file to a handle.
    Img { to: String, path: PathBuf },

    /// List the other known clients.
    Clients,

    /// Show this client's handle and address.
    WhoAmI,

    /// Switch AFK mode on or off.
    Afk(bool),

    /// Edit and persist one configuration value.
    Set { key: String, value: String },

    /// Save the chat transcript to a file.
    SaveTranscript(String),

    /// Display help information.
    Help,

    /// Leave the chat and exit.
    Leave,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses one prompt line.
///
/// Returns `None` for blank input.
///
/// # Examples
///
/// ```
/// # use slcp::chat::{ChatCommand, parse_command};
/// assert_eq!(parse_command("leave"), Some(ChatCommand::Leave));
/// assert!(parse_command("msg Bob hello there").is_some());
/// assert!(parse_command("   ").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let input = input.strip_prefix('/').unwrap_or(input);

    if input.is_empty() {
        return None;
    }

    let mut parts = input.splitn(2, char::is_whitespace);
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "msg" => match split_target(argument) {
            Some((to, text)) => ChatCommand::Msg {
                to: to.to_string(),
                text: text.to_string(),
            },
            None => ChatCommand::Invalid("usage: msg <handle> <text>".to_string()),
        },
        "img" => match split_target(argument) {
            Some((to, path)) => ChatCommand::Img {
                to: to.to_string(),
                path: PathBuf::from(path),
            },
            None => ChatCommand::Invalid("usage: img <handle> <path_to_image>".to_string()),
        },
        "clients" | "peers" => ChatCommand::Clients,
        "whoami" => ChatCommand::WhoAmI,
        "afk" => match argument.and_then(parse_on_off) {
            Some(value) => ChatCommand::Afk(value),
            None => ChatCommand::Invalid("usage: afk on|off".to_string()),
        },
        "set" => match split_target(argument) {
            Some((key, value)) => ChatCommand::Set {
                key: key.to_lowercase(),
                value: value.to_string(),
            },
            None => ChatCommand::Invalid(
                "usage: set handle|port|autoreply|imagepath <value>".to_string(),
            ),
        },
        "save" => match argument {
            Some(arg) => ChatCommand::SaveTranscript(arg.to_string()),
            None => ChatCommand::Invalid("usage: save <file>".to_string()),
        },
        "help" | "?" => ChatCommand::Help,
        "leave" | "quit" | "exit" | "q" => ChatCommand::Leave,
        _ => ChatCommand::Invalid(format!(
            "Unknown command: {command}. Type 'help' for commands."
        )),
    };

    Some(result)
}

fn split_target(argument: Option<&str>) -> Option<(&str, &str)> {
    let (target, rest) = argument?.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    if rest.is_empty() {
        None
    } else {
        Some((target, rest))
    }
}

fn parse_on_off(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "yes" => Some(true),
        "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  msg <handle> <text>         Send a message (use ALL for everyone)
  img <handle> <path>         Send an image file
  clients                     List other active clients
  whoami                      Show your handle and address
  afk on|off                  Toggle away mode with autoreply
  set <key> <value>           Change handle, port, autoreply or imagepath
  save <file>                 Save the chat transcript as JSON
  help                        Show this help message
  leave                       Leave the chat"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_leave_aliases() {
        assert_eq!(parse_command("leave"), Some(ChatCommand::Leave));
        assert_eq!(parse_command("/quit"), Some(ChatCommand::Leave));
        assert_eq!(parse_command("EXIT"), Some(ChatCommand::Leave));
        assert_eq!(parse_command("  q  "), Some(ChatCommand::Leave));
    }

    #[test]
    fn parse_msg_keeps_text() {
        assert_eq!(
            parse_command("msg Bob hello   world"),
            Some(ChatCommand::Msg {
                to: "Bob".to_string(),
                text: "hello   world".to_string(),
            })
        );
        assert_eq!(
            parse_command("msg Bob"),
            Some(ChatCommand::Invalid("usage: msg <handle> <text>".to_string()))
        );
        assert!(matches!(parse_command("msg"), Some(ChatCommand::Invalid(_))));
    }

    #[test]
    fn parse_img_path_with_spaces() {
        assert_eq!(
            parse_command("img Bob ./My Pictures/cat.png"),
            Some(ChatCommand::Img {
                to: "Bob".to_string(),
                path: PathBuf::from("./My Pictures/cat.png"),
            })
        );
    }

    #[test]
    fn parse_afk() {
        assert_eq!(parse_command("afk on"), Some(ChatCommand::Afk(true)));
        assert_eq!(parse_command("afk OFF"), Some(ChatCommand::Afk(false)));
        assert!(matches!(
            parse_command("afk maybe"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("afk on|off")
        ));
        assert!(matches!(parse_command("afk"), Some(ChatCommand::Invalid(_))));
    }

    #[test]
    fn parse_set() {
        assert_eq!(
            parse_command("set Autoreply back in five"),
            Some(ChatCommand::Set {
                key: "autoreply".to_string(),
                value: "back in five".to_string(),
            })
        );
        assert!(matches!(parse_command("set port"), Some(ChatCommand::Invalid(_))));
    }

    #[test]
    fn parse_simple_commands() {
        assert_eq!(parse_command("clients"), Some(ChatCommand::Clients));
        assert_eq!(parse_command("whoami"), Some(ChatCommand::WhoAmI));
        assert_eq!(parse_command("help"), Some(ChatCommand::Help));
        assert_eq!(
            parse_command("save chat.json"),
            Some(ChatCommand::SaveTranscript("chat.json".to_string()))
        );
    }

    #[test]
    fn unknown_and_blank() {
        assert!(matches!(
            parse_command("dance"),
            Some(ChatCommand::Invalid(msg)) if msg.contains("Unknown command")
        ));
        assert_eq!(parse_command(""), None);
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn help_text_lists_commands() {
        let help = help_text();
        for command in ["msg", "img", "clients", "afk", "leave", "set", "save"] {
            assert!(help.contains(command), "missing {command}");
        }
    }
}
