// Public modules
pub mod chat;
pub mod config;
pub mod discovery;
pub mod error;
pub mod network;
pub mod observability;
pub mod peers;
pub mod protocol;
pub mod transfer;
pub mod utils;

// Re-exports
pub use config::{ClientConfig, ConfigFile, PortSpec};
pub use discovery::{Discovery, DiscoveryState};
pub use error::{Error, Result};
pub use network::{NetCommand, NetEvent, NetworkService};
pub use observability::register_biometrics;
pub use peers::{Peer, PeerTable};
pub use protocol::{BROADCAST_HANDLE, KnownUser, Message, SlcpCodec};
