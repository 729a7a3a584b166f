//! The SLCP wire format.
//!
//! Every control message is a single line of UTF-8 text carried in one UDP
//! datagram. Tokens are separated by spaces; the free-form text of a `MSG`
//! keeps its inner whitespace.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Error, Result};
use crate::observability::DATAGRAMS_MALFORMED;

/// Recipient name that addresses every peer.
pub const BROADCAST_HANDLE: &str = "ALL";

/// An entry of a `KNOWUSERS` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownUser {
    /// Handle of the user.
    pub handle: String,
    /// Address the user was seen at.
    pub ip: IpAddr,
    /// The user's chat port.
    pub port: u16,
}

impl fmt::Display for KnownUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.handle, self.ip, self.port)
    }
}

/// A parsed SLCP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `JOIN <handle> <port>`
    Join { handle: String, port: u16 },
    /// `LEAVE <handle>`
    Leave { handle: String },
    /// `WHO`
    Who,
    /// `KNOWUSERS <h> <ip> <p>,...`
    KnownUsers(Vec<KnownUser>),
    /// `MSG <from> <to> <text>`
    Msg {
        from: String,
        to: String,
        text: String,
    },
    /// `IMG <from> <to> <tcp_port> <size>`
    Img {
        from: String,
        to: String,
        tcp_port: u16,
        size: u64,
    },
}

impl Message {
    /// Parses one wire line.
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim_start()),
            None => (line, ""),
        };
        let malformed = |what: &str| Error::protocol(what.to_string(), Some(line.to_string()));

        match command {
            "JOIN" => match tokens(rest).as_slice() {
                [handle, port] => Ok(Message::Join {
                    handle: parse_handle(handle, line)?,
                    port: parse_port(port, line)?,
                }),
                _ => Err(malformed("JOIN expects <handle> <port>")),
            },
            "LEAVE" => match tokens(rest).as_slice() {
                [handle] => Ok(Message::Leave {
                    handle: parse_handle(handle, line)?,
                }),
                _ => Err(malformed("LEAVE expects <handle>")),
            },
            // Older clients append their handle and port; neither is needed.
            "WHO" => Ok(Message::Who),
            // Some older clients misspell the keyword.
            "KNOWUSERS" | "KNOWNUSERS" => Ok(Message::KnownUsers(parse_known_users(rest))),
            "MSG" => {
                let mut parts = rest.splitn(3, ' ');
                let from = parts.next().unwrap_or_default();
                let to = parts.next().unwrap_or_default();
                let text = parts.next().unwrap_or_default();
                if from.is_empty() || to.is_empty() {
                    return Err(malformed("MSG expects <from> <to> <text>"));
                }
                Ok(Message::Msg {
                    from: parse_handle(from, line)?,
                    to: parse_handle(to, line)?,
                    text: text.to_string(),
                })
            }
            "IMG" => match tokens(rest).as_slice() {
                [from, to, tcp_port, size] => Ok(Message::Img {
                    from: parse_handle(from, line)?,
                    to: parse_handle(to, line)?,
                    tcp_port: parse_port(tcp_port, line)?,
                    size: size
                        .parse()
                        .map_err(|_| malformed("IMG size must be an unsigned integer"))?,
                }),
                _ => Err(malformed("IMG expects <from> <to> <tcp_port> <size>")),
            },
            "" => Err(malformed("empty message")),
            other => Err(Error::protocol(
                format!("unknown command {other}"),
                Some(line.to_string()),
            )),
        }
    }

    /// The command keyword of this message.
    pub fn command(&self) -> &'static str {
        match self {
            Message::Join { .. } => "JOIN",
            Message::Leave { .. } => "LEAVE",
            Message::Who => "WHO",
            Message::KnownUsers(_) => "KNOWUSERS",
            Message::Msg { .. } => "MSG",
            Message::Img { .. } => "IMG",
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Join { handle, port } => write!(f, "JOIN {handle} {port}"),
            Message::Leave { handle } => write!(f, "LEAVE {handle}"),
            Message::Who => write!(f, "WHO"),
            Message::KnownUsers(users) => {
                write!(f, "KNOWUSERS ")?;
                for (idx, user) in users.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{user}")?;
                }
                Ok(())
            }
            Message::Msg { from, to, text } => write!(f, "MSG {from} {to} {text}"),
            Message::Img {
                from,
                to,
                tcp_port,
                size,
            } => write!(f, "IMG {from} {to} {tcp_port} {size}"),
        }
    }
}

impl FromStr for Message {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Message::parse(s)
    }
}

/// Returns true when `handle` can travel as a single protocol token.
pub fn is_valid_handle(handle: &str) -> bool {
    !handle.is_empty() && !handle.chars().any(|c| c.is_whitespace() || c == ',')
}

fn tokens(rest: &str) -> Vec<&str> {
    rest.split_whitespace().collect()
}

fn parse_handle(token: &str, line: &str) -> Result<String> {
    if is_valid_handle(token) {
        Ok(token.to_string())
    } else {
        Err(Error::protocol(
            format!("invalid handle {token:?}"),
            Some(line.to_string()),
        ))
    }
}

fn parse_port(token: &str, line: &str) -> Result<u16> {
    token.parse().map_err(|_| {
        Error::protocol(
            format!("invalid port {token:?}"),
            Some(line.to_string()),
        )
    })
}

fn parse_known_users(rest: &str) -> Vec<KnownUser> {
    rest.split(',')
        .filter_map(|chunk| match tokens(chunk).as_slice() {
            [handle, ip, port] if is_valid_handle(handle) => Some(KnownUser {
                handle: handle.to_string(),
                ip: ip.parse().ok()?,
                port: port.parse().ok()?,
            }),
            _ => None,
        })
        .collect()
}

/// Frames one SLCP message per datagram.
///
/// Datagrams that are not UTF-8 or do not parse are consumed and dropped so a
/// single bad packet never ends a `UdpFramed` stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct SlcpCodec;

impl Decoder for SlcpCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.is_empty() {
            return Ok(None);
        }
        let datagram = src.split();
        let text = match std::str::from_utf8(&datagram) {
            Ok(text) => text,
            Err(err) => {
                DATAGRAMS_MALFORMED.click();
                tracing::debug!("dropping non UTF-8 datagram: {err}");
                return Ok(None);
            }
        };
        match Message::parse(text) {
            Ok(message) => Ok(Some(message)),
            Err(err) => {
                DATAGRAMS_MALFORMED.click();
                tracing::debug!("dropping datagram: {err}");
                Ok(None)
            }
        }
    }
}

impl Encoder<Message> for SlcpCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let line = item.to_string();
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_join_and_leave() {
        assert_eq!(
            Message::parse("JOIN Alice 5000\n").unwrap(),
            Message::Join {
                handle: "Alice".to_string(),
                port: 5000
            }
        );
        assert_eq!(
            Message::parse("LEAVE Bob").unwrap(),
            Message::Leave {
                handle: "Bob".to_string()
            }
        );
        assert!(Message::parse("JOIN Alice").is_err());
        assert!(Message::parse("JOIN Alice notaport").is_err());
    }

    #[test]
    fn parse_who_with_legacy_arguments() {
        assert_eq!(Message::parse("WHO").unwrap(), Message::Who);
        assert_eq!(Message::parse("WHO Alice 5000").unwrap(), Message::Who);
    }

    #[test]
    fn msg_text_keeps_inner_whitespace() {
        let msg = Message::parse("MSG Alice Bob hello   there, Bob").unwrap();
        assert_eq!(
            msg,
            Message::Msg {
                from: "Alice".to_string(),
                to: "Bob".to_string(),
                text: "hello   there, Bob".to_string(),
            }
        );
        assert_eq!(msg.to_string(), "MSG Alice Bob hello   there, Bob");
    }

    #[test]
    fn msg_without_recipient_is_rejected() {
        assert!(Message::parse("MSG Alice").is_err());
        assert!(Message::parse("MSG").is_err());
    }

    #[test]
    fn known_users_accept_both_separators() {
        let msg = Message::parse("KNOWUSERS Alice 10.0.0.1 5000, Bob 10.0.0.2 5001,").unwrap();
        let Message::KnownUsers(users) = msg else {
            panic!("expected KNOWUSERS");
        };
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].handle, "Bob");
        assert_eq!(users[1].port, 5001);
    }

    #[test]
    fn known_users_skip_malformed_entries() {
        let msg = Message::parse("KNOWUSERS Alice 10.0.0.1 5000,garbage,Eve nope 1").unwrap();
        assert_eq!(
            msg,
            Message::KnownUsers(vec![KnownUser {
                handle: "Alice".to_string(),
                ip: "10.0.0.1".parse().unwrap(),
                port: 5000,
            }])
        );
        assert_eq!(msg.to_string(), "KNOWUSERS Alice 10.0.0.1 5000");
    }

    #[test]
    fn misspelled_known_users_keyword_is_accepted() {
        let msg = Message::parse("KNOWNUSERS Bob 10.0.0.2 5001").unwrap();
        assert_eq!(
            msg,
            Message::KnownUsers(vec![KnownUser {
                handle: "Bob".to_string(),
                ip: "10.0.0.2".parse().unwrap(),
                port: 5001,
            }])
        );
        assert_eq!(msg.command(), "KNOWUSERS");
    }

    #[test]
    fn parse_img() {
        assert_eq!(
            Message::parse("IMG Alice Bob 40123 2048").unwrap(),
            Message::Img {
                from: "Alice".to_string(),
                to: "Bob".to_string(),
                tcp_port: 40123,
                size: 2048,
            }
        );
        assert!(Message::parse("IMG Alice Bob 40123 -1").is_err());
    }

    #[test]
    fn unknown_command_is_protocol_error() {
        let err = Message::parse("PING").unwrap_err();
        assert!(err.is_protocol());
        assert!(Message::parse("   ").is_err());
    }

    #[test]
    fn handle_validation() {
        assert!(is_valid_handle("Alice"));
        assert!(!is_valid_handle(""));
        assert!(!is_valid_handle("Al ice"));
        assert!(!is_valid_handle("Al,ice"));
    }

    #[test]
    fn codec_drops_bad_datagrams() {
        let mut codec = SlcpCodec;
        let mut buf = BytesMut::from(&b"\xff\xfe"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        let mut buf = BytesMut::from(&b"NOPE 1 2"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        let mut buf = BytesMut::from(&b"LEAVE Carol\n"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Message::Leave {
                handle: "Carol".to_string()
            })
        );
    }

    #[test]
    fn codec_appends_newline() {
        let mut codec = SlcpCodec;
        let mut buf = BytesMut::new();
        codec.encode(Message::Who, &mut buf).unwrap();
        assert_eq!(&buf[..], b"WHO\n");
    }
}
