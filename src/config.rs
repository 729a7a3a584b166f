//! Client configuration stored in `config.toml`.
//!
//! The file lists every participant under `[[clients]]`; a client is started
//! by naming its handle on the command line.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{BROADCAST_HANDLE, is_valid_handle};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// The chat port of a client.
///
/// Older configuration files store a list of ports; only the first one is
/// used for chat traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    /// `port = 5000`
    Single(u16),
    /// `port = [5000, 5001]`
    List(Vec<u16>),
}

impl PortSpec {
    /// Returns the chat port, if one is configured.
    pub fn primary(&self) -> Option<u16> {
        match self {
            PortSpec::Single(port) => Some(*port),
            PortSpec::List(ports) => ports.first().copied(),
        }
    }

    /// Replaces the chat port while keeping any additional list entries.
    pub fn set_primary(&mut self, port: u16) {
        match self {
            PortSpec::Single(existing) => *existing = port,
            PortSpec::List(ports) if !ports.is_empty() => ports[0] = port,
            PortSpec::List(_) => *self = PortSpec::Single(port),
        }
    }
}

/// Configuration for one chat participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// The participant's handle.
    pub handle: String,

    /// The UDP port for chat traffic.
    pub port: PortSpec,

    /// The UDP port shared by all clients for discovery.
    pub whoisport: u16,

    /// Text sent back automatically while AFK.
    #[serde(default)]
    pub autoreply: String,

    /// Directory that received images are written to.
    pub imagepath: PathBuf,
}

impl ClientConfig {
    /// Creates a configuration with a single chat port.
    pub fn new(handle: impl Into<String>, port: u16, whoisport: u16) -> Self {
        let handle = handle.into();
        Self {
            imagepath: PathBuf::from("images").join(&handle),
            handle,
            port: PortSpec::Single(port),
            whoisport,
            autoreply: String::new(),
        }
    }

    /// Sets the autoreply text.
    pub fn with_autoreply(mut self, autoreply: impl Into<String>) -> Self {
        self.autoreply = autoreply.into();
        self
    }

    /// Sets the image directory.
    pub fn with_imagepath(mut self, imagepath: impl Into<PathBuf>) -> Self {
        self.imagepath = imagepath.into();
        self
    }

    /// The chat port.
    pub fn chat_port(&self) -> Result<u16> {
        self.port
            .primary()
            .ok_or_else(|| Error::validation("no chat port configured", Some("port".to_string())))
    }

    /// Checks the fields that the protocol depends on.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_handle(&self.handle) || self.handle == BROADCAST_HANDLE {
            return Err(Error::validation(
                format!("invalid handle {:?}", self.handle),
                Some("handle".to_string()),
            ));
        }
        let chat_port = self.chat_port()?;
        if self.whoisport == 0 {
            return Err(Error::validation(
                "whoisport must not be 0",
                Some("whoisport".to_string()),
            ));
        }
        if chat_port == self.whoisport {
            return Err(Error::validation(
                format!("port {chat_port} is also the whoisport"),
                Some("port".to_string()),
            ));
        }
        if self.imagepath.as_os_str().is_empty() {
            return Err(Error::validation(
                "imagepath must not be empty",
                Some("imagepath".to_string()),
            ));
        }
        Ok(())
    }

    /// Applies one `key = value` edit.
    ///
    /// The edited configuration is checked with [`ClientConfig::validate`]
    /// and left untouched on error.
    pub fn apply_setting(&mut self, key: &str, value: &str) -> Result<()> {
        let mut edited = self.clone();
        match key.to_lowercase().as_str() {
            "handle" => edited.handle = value.trim().to_string(),
            "port" => {
                let port = value.trim().parse::<u16>().map_err(|_| {
                    Error::validation("port expects a number", Some("port".to_string()))
                })?;
                edited.port.set_primary(port);
            }
            "autoreply" => edited.autoreply = value.to_string(),
            "imagepath" => edited.imagepath = PathBuf::from(value.trim()),
            other => {
                return Err(Error::validation(
                    format!("unknown setting {other} (use handle, port, autoreply, imagepath)"),
                    Some(other.to_string()),
                ));
            }
        }
        edited.validate()?;
        *self = edited;
        Ok(())
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// All configured participants.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

impl ConfigFile {
    /// Parses configuration text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.clients.is_empty() {
            return Err(Error::config("no [[clients]] section found", None));
        }
        Ok(config)
    }

    /// Loads the configuration from `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))?;
        Self::parse(&content)
    }

    /// Writes the configuration back to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string(self)?;
        std::fs::write(path, content)
            .map_err(|err| Error::io(format!("failed to write {}", path.display()), err))
    }

    /// Handles of all configured clients, in file order.
    pub fn handles(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.handle.as_str()).collect()
    }

    /// Index of the client named `handle`.
    pub fn position(&self, handle: &str) -> Result<usize> {
        self.clients
            .iter()
            .position(|c| c.handle == handle)
            .ok_or_else(|| {
                Error::not_found(
                    format!("available handles: {}", self.handles().join(", ")),
                    Some("handle".to_string()),
                    Some(handle.to_string()),
                )
            })
    }

    /// The client named `handle`.
    pub fn client(&self, handle: &str) -> Result<&ClientConfig> {
        let index = self.position(handle)?;
        Ok(&self.clients[index])
    }

    /// Replaces the client at `index`.
    pub fn update_client(&mut self, index: usize, client: ClientConfig) -> Result<()> {
        client.validate()?;
        if self
            .clients
            .iter()
            .enumerate()
            .any(|(i, c)| i != index && c.handle == client.handle)
        {
            return Err(Error::validation(
                format!("handle {} is already configured", client.handle),
                Some("handle".to_string()),
            ));
        }
        match self.clients.get_mut(index) {
            Some(slot) => {
                *slot = client;
                Ok(())
            }
            None => Err(Error::not_found(
                format!("no client at index {index}"),
                Some("client".to_string()),
                None,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[clients]]
handle = "Alice"
port = [5000, 5001]
whoisport = 4000
autoreply = "Away, back soon"
imagepath = "./images/alice"

[[clients]]
handle = "Bob"
port = 5002
whoisport = 4000
imagepath = "./images/bob"
"#;

    #[test]
    fn parse_sample() {
        let config = ConfigFile::parse(SAMPLE).unwrap();
        assert_eq!(config.handles(), vec!["Alice", "Bob"]);
        let alice = config.client("Alice").unwrap();
        assert_eq!(alice.chat_port().unwrap(), 5000);
        assert_eq!(alice.autoreply, "Away, back soon");
        let bob = config.client("Bob").unwrap();
        assert_eq!(bob.chat_port().unwrap(), 5002);
        assert!(bob.autoreply.is_empty());
    }

    #[test]
    fn missing_clients_is_error() {
        let err = ConfigFile::parse("").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn unknown_handle_lists_available() {
        let config = ConfigFile::parse(SAMPLE).unwrap();
        let err = config.client("Carol").unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Alice, Bob"));
    }

    #[test]
    fn validate_rejects_bad_handles() {
        assert!(ClientConfig::new("Alice", 5000, 4000).validate().is_ok());
        assert!(ClientConfig::new("A B", 5000, 4000).validate().is_err());
        assert!(ClientConfig::new("ALL", 5000, 4000).validate().is_err());
        assert!(ClientConfig::new("Alice", 5000, 0).validate().is_err());
        let err = ClientConfig::new("Alice", 4000, 4000).validate().unwrap_err();
        assert!(err.is_validation());
        let empty_ports = ClientConfig {
            port: PortSpec::List(Vec::new()),
            ..ClientConfig::new("Alice", 5000, 4000)
        };
        assert!(empty_ports.validate().is_err());
    }

    #[test]
    fn apply_setting_updates_fields() {
        let mut config = ConfigFile::parse(SAMPLE).unwrap().clients[0].clone();
        config.apply_setting("port", "6000").unwrap();
        assert_eq!(config.port, PortSpec::List(vec![6000, 5001]));
        config.apply_setting("autoreply", "gone fishing").unwrap();
        assert_eq!(config.autoreply, "gone fishing");
        config.apply_setting("HANDLE", "Alicia").unwrap();
        assert_eq!(config.handle, "Alicia");

        assert!(config.apply_setting("port", "lots").is_err());
        assert!(config.apply_setting("port", "4000").is_err());
        assert_eq!(config.port, PortSpec::List(vec![6000, 5001]));
        assert!(config.apply_setting("handle", "two words").is_err());
        assert!(config.apply_setting("colour", "blue").is_err());
        assert_eq!(config.handle, "Alicia");
    }

    #[test]
    fn update_client_rejects_duplicate_handle() {
        let mut config = ConfigFile::parse(SAMPLE).unwrap();
        let mut alice = config.clients[0].clone();
        alice.handle = "Bob".to_string();
        assert!(config.update_client(0, alice).is_err());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = ConfigFile::parse(SAMPLE).unwrap();
        let mut bob = config.clients[1].clone();
        bob.apply_setting("autoreply", "brb").unwrap();
        config.update_client(1, bob).unwrap();
        config.save(&path).unwrap();

        let reloaded = ConfigFile::load(&path).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(reloaded.client("Bob").unwrap().autoreply, "brb");
    }
}
