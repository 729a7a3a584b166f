//! Broadcast peer discovery.
//!
//! Every client periodically broadcasts `JOIN` and `WHO` on the shared
//! discovery port. The one client that managed to bind that port acts as the
//! WHO responder and answers with a `KNOWUSERS` list; every other client runs
//! on an ephemeral port and learns about peers from those replies.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::udp::UdpFramed;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::observability::{
    DISCOVERY_ANNOUNCEMENTS, DISCOVERY_JOINS, DISCOVERY_KNOWN_USERS, DISCOVERY_LEAVES,
    DISCOVERY_WHO_REPLIES, SEND_ERRORS,
};
use crate::peers::{Peer, PeerTable};
use crate::protocol::{KnownUser, Message, SlcpCodec};

/// Interval between `JOIN`/`WHO` announcements.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(3);

/// The limited broadcast address used for announcements.
pub fn broadcast_addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port)
}

/// Returns the address of the interface used for outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only selects a route. Falls back
/// to loopback when no route exists.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = StdUdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(("8.8.8.8", 80))?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Discovery bookkeeping, independent of the socket.
#[derive(Debug, Clone)]
pub struct DiscoveryState {
    handle: String,
    chat_port: u16,
    local_ip: IpAddr,
    peers: PeerTable,
    responder: bool,
}

impl DiscoveryState {
    /// Creates discovery state for the client `handle` chatting on `chat_port`.
    pub fn new(
        handle: impl Into<String>,
        chat_port: u16,
        local_ip: IpAddr,
        peers: PeerTable,
        responder: bool,
    ) -> Self {
        Self {
            handle: handle.into(),
            chat_port,
            local_ip,
            peers,
            responder,
        }
    }

    /// Whether this client answers `WHO`.
    pub fn is_responder(&self) -> bool {
        self.responder
    }

    /// The `JOIN` announcement for this client.
    pub fn join(&self) -> Message {
        Message::Join {
            handle: self.handle.clone(),
            port: self.chat_port,
        }
    }

    /// The `KNOWUSERS` list: this client first, then every known peer.
    pub fn known_users(&self) -> Message {
        let mut users = vec![KnownUser {
            handle: self.handle.clone(),
            ip: self.local_ip,
            port: self.chat_port,
        }];
        users.extend(self.peers.others(&self.handle).iter().map(KnownUser::from));
        Message::KnownUsers(users)
    }

    /// Applies one incoming message and returns the reply to send back, if any.
    pub fn handle(&self, message: Message, from: SocketAddr) -> Option<Message> {
        match message {
            Message::Join { handle, port } => {
                if handle != self.handle && self.peers.upsert(Peer::new(&handle, from.ip(), port)) {
                    DISCOVERY_JOINS.click();
                    tracing::info!("new peer {handle} at {}:{port}", from.ip());
                }
                None
            }
            Message::Leave { handle } => {
                if self.peers.remove(&handle) {
                    DISCOVERY_LEAVES.click();
                    tracing::info!("{handle} left");
                }
                None
            }
            Message::Who if self.responder => {
                DISCOVERY_WHO_REPLIES.click();
                Some(self.known_users())
            }
            Message::KnownUsers(users) => {
                let changed = self
                    .peers
                    .merge(users.into_iter().map(Peer::from), &self.handle);
                if changed > 0 {
                    DISCOVERY_KNOWN_USERS.count(changed as u64);
                    tracing::debug!("merged {changed} peers from {from}");
                }
                None
            }
            _ => None,
        }
    }
}

/// The discovery service.
pub struct Discovery {
    socket: UdpFramed<SlcpCodec>,
    state: DiscoveryState,
    announce_to: SocketAddr,
    interval: Duration,
}

impl Discovery {
    /// Binds the discovery port named in `config`.
    ///
    /// When the port is taken the service falls back to an ephemeral port
    /// and does not answer `WHO`.
    pub async fn bind(config: &ClientConfig, peers: PeerTable) -> Result<Self> {
        let chat_port = config.chat_port()?;
        let (socket, responder) = match UdpSocket::bind(("0.0.0.0", config.whoisport)).await {
            Ok(socket) => (socket, true),
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::info!(
                    "discovery port {} in use, running without WHO responder",
                    config.whoisport
                );
                let socket = UdpSocket::bind(("0.0.0.0", 0))
                    .await
                    .map_err(|err| Error::io("failed to bind discovery socket", err))?;
                (socket, false)
            }
            Err(err) => return Err(Error::io("failed to bind discovery port", err)),
        };
        let state = DiscoveryState::new(&config.handle, chat_port, local_ip(), peers, responder);
        Self::from_socket(socket, state, broadcast_addr(config.whoisport))
    }

    /// Wraps an already bound socket.
    pub fn from_socket(
        socket: UdpSocket,
        state: DiscoveryState,
        announce_to: SocketAddr,
    ) -> Result<Self> {
        socket.set_broadcast(true)?;
        Ok(Self {
            socket: UdpFramed::new(socket, SlcpCodec),
            state,
            announce_to,
            interval: ANNOUNCE_INTERVAL,
        })
    }

    /// Overrides the announcement interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Whether this client answers `WHO`.
    pub fn is_responder(&self) -> bool {
        self.state.is_responder()
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.get_ref().local_addr()?)
    }

    /// Runs until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.announce().await,
                frame = self.socket.next() => match frame {
                    Some(Ok((message, from))) => {
                        tracing::trace!("discovery recv {message} from {from}");
                        if let Some(reply) = self.state.handle(message, from) {
                            self.send(reply, from).await;
                        }
                    }
                    Some(Err(err)) => tracing::warn!("discovery receive failed: {err}"),
                    None => break,
                },
            }
        }
        tracing::debug!("discovery stopped");
        Ok(())
    }

    async fn announce(&mut self) {
        DISCOVERY_ANNOUNCEMENTS.click();
        let join = self.state.join();
        self.send(join, self.announce_to).await;
        self.send(Message::Who, self.announce_to).await;
    }

    async fn send(&mut self, message: Message, to: SocketAddr) {
        if let Err(err) = self.socket.send((message, to)).await {
            SEND_ERRORS.click();
            tracing::debug!("discovery send to {to} failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(responder: bool) -> DiscoveryState {
        DiscoveryState::new(
            "Alice",
            5000,
            "10.0.0.1".parse().unwrap(),
            PeerTable::new(),
            responder,
        )
    }

    fn from(ip: &str) -> SocketAddr {
        SocketAddr::new(ip.parse().unwrap(), 4000)
    }

    #[test]
    fn join_records_source_address() {
        let state = state(false);
        let reply = state.handle(
            Message::Join {
                handle: "Bob".to_string(),
                port: 5001,
            },
            from("10.0.0.2"),
        );
        assert!(reply.is_none());
        let bob = state.peers.get("Bob").unwrap();
        assert_eq!(bob.addr(), "10.0.0.2:5001".parse().unwrap());
    }

    #[test]
    fn own_join_is_ignored() {
        let state = state(true);
        state.handle(state.join(), from("10.0.0.1"));
        assert!(state.peers.is_empty());
    }

    #[test]
    fn leave_removes_peer() {
        let state = state(false);
        state.peers.upsert(Peer::new("Bob", "10.0.0.2".parse().unwrap(), 5001));
        state.handle(
            Message::Leave {
                handle: "Bob".to_string(),
            },
            from("10.0.0.2"),
        );
        assert!(state.peers.is_empty());
    }

    #[test]
    fn only_responder_answers_who() {
        assert!(state(false).handle(Message::Who, from("10.0.0.2")).is_none());

        let responder = state(true);
        responder
            .peers
            .upsert(Peer::new("Bob", "10.0.0.2".parse().unwrap(), 5001));
        let reply = responder.handle(Message::Who, from("10.0.0.3")).unwrap();
        assert_eq!(
            reply.to_string(),
            "KNOWUSERS Alice 10.0.0.1 5000,Bob 10.0.0.2 5001"
        );
    }

    #[test]
    fn known_users_merge_without_self() {
        let state = state(false);
        let reply = Message::parse("KNOWUSERS Alice 10.0.0.1 5000,Bob 10.0.0.2 5001").unwrap();
        state.handle(reply, from("10.0.0.9"));
        assert_eq!(state.peers.len(), 1);
        assert!(state.peers.get("Alice").is_none());
    }

    #[tokio::test]
    async fn busy_discovery_port_falls_back_to_non_responder() {
        let taken = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        let whoisport = taken.local_addr().unwrap().port();
        let config = ClientConfig::new("Alice", 5000, whoisport);
        let discovery = Discovery::bind(&config, PeerTable::new()).await.unwrap();
        assert!(!discovery.is_responder());
        assert_ne!(discovery.local_addr().unwrap().port(), whoisport);
    }

    #[tokio::test]
    async fn free_discovery_port_makes_responder() {
        let scratch = UdpSocket::bind("0.0.0.0:0").await.unwrap();
        let whoisport = scratch.local_addr().unwrap().port();
        drop(scratch);
        let config = ClientConfig::new("Alice", 5000, whoisport);
        let discovery = Discovery::bind(&config, PeerTable::new()).await.unwrap();
        assert!(discovery.is_responder());
        assert_eq!(discovery.local_addr().unwrap().port(), whoisport);
    }

    #[tokio::test]
    async fn responder_replies_over_loopback() {
        let peers = PeerTable::new();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let state = DiscoveryState::new(
            "Alice",
            5000,
            "127.0.0.1".parse().unwrap(),
            peers.clone(),
            true,
        );
        let discovery = Discovery::from_socket(socket, state, listener.local_addr().unwrap())
            .unwrap()
            .with_interval(Duration::from_millis(50));
        let discovery_addr = discovery.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(discovery.run(shutdown.clone()));

        // Announcements arrive at the configured target.
        let mut buf = [0u8; 1024];
        let (n, _) = listener.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"JOIN Alice 5000\n");

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"JOIN Bob 5001", discovery_addr).await.unwrap();
        client.send_to(b"WHO", discovery_addr).await.unwrap();
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        let reply = Message::parse(std::str::from_utf8(&buf[..n]).unwrap()).unwrap();
        assert_eq!(
            reply,
            Message::parse("KNOWUSERS Alice 127.0.0.1 5000,Bob 127.0.0.1 5001").unwrap()
        );
        assert!(peers.get("Bob").is_some());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
