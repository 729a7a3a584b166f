//! The chat network service.
//!
//! The service owns the client's chat socket. It turns [`NetCommand`]s from
//! the front end into SLCP datagrams and turns incoming datagrams into
//! [`NetEvent`]s, answering direct messages with the autoreply while AFK.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use futures::{SinkExt, StreamExt};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::udp::UdpFramed;

use crate::config::ClientConfig;
use crate::discovery::broadcast_addr;
use crate::error::{Error, Result};
use crate::observability::{
    AUTOREPLIES_SENT, DATAGRAMS_IGNORED, IMAGES_RECEIVED, IMAGES_SENT, MESSAGES_RECEIVED,
    MESSAGES_SENT, SEND_ERRORS,
};
use crate::peers::{Peer, PeerTable};
use crate::protocol::{BROADCAST_HANDLE, Message, SlcpCodec};
use crate::transfer;

/// A request from the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetCommand {
    /// Send a text message to a handle or to `ALL`.
    Msg { to: String, text: String },
    /// Offer an image file to a handle.
    Img { to: String, path: PathBuf },
    /// Tell every peer that this client leaves.
    Leave,
    /// Enter (`true`) or leave (`false`) AFK mode.
    Afk(bool),
    /// Stop the service.
    Exit,
}

/// Something the front end should show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// A text message addressed to this client or to everyone.
    Msg {
        from: String,
        to: String,
        text: String,
    },
    /// A received image, already written to disk.
    Img { from: String, path: PathBuf },
    /// An image offer was sent.
    ImgSent { to: String, path: PathBuf },
    /// A peer left.
    Leave { handle: String },
    /// A failure that did not stop the service.
    Error { message: String },
}

/// The chat network service.
pub struct NetworkService {
    socket: UdpFramed<SlcpCodec>,
    handle: String,
    autoreply: String,
    image_dir: PathBuf,
    peers: PeerTable,
    leave_broadcast: Option<SocketAddr>,
    away: bool,
    autoreplied: HashSet<String>,
    events: mpsc::UnboundedSender<NetEvent>,
}

impl NetworkService {
    /// Binds the chat port named in `config`.
    pub async fn bind(
        config: &ClientConfig,
        peers: PeerTable,
        events: mpsc::UnboundedSender<NetEvent>,
    ) -> Result<Self> {
        let port = config.chat_port()?;
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|err| Error::io(format!("failed to bind chat port {port}"), err))?;
        Self::from_socket(socket, config, peers, events)
    }

    /// Wraps an already bound socket.
    pub fn from_socket(
        socket: UdpSocket,
        config: &ClientConfig,
        peers: PeerTable,
        events: mpsc::UnboundedSender<NetEvent>,
    ) -> Result<Self> {
        socket.set_broadcast(true)?;
        Ok(Self {
            socket: UdpFramed::new(socket, SlcpCodec),
            handle: config.handle.clone(),
            autoreply: config.autoreply.clone(),
            image_dir: config.imagepath.clone(),
            peers,
            leave_broadcast: Some(broadcast_addr(config.whoisport)),
            away: false,
            autoreplied: HashSet::new(),
            events,
        })
    }

    /// Overrides where `LEAVE` is broadcast; `None` disables the broadcast.
    pub fn with_leave_broadcast(mut self, addr: Option<SocketAddr>) -> Self {
        self.leave_broadcast = addr;
        self
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.get_ref().local_addr()?)
    }

    /// Runs until [`NetCommand::Exit`], a closed command channel, or `shutdown`.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<NetCommand>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(NetCommand::Exit) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                frame = self.socket.next() => match frame {
                    Some(Ok((message, from))) => self.handle_datagram(message, from).await,
                    Some(Err(err)) => tracing::warn!("chat receive failed: {err}"),
                    None => break,
                },
            }
        }
        tracing::debug!("network service for {} stopped", self.handle);
        Ok(())
    }

    async fn handle_command(&mut self, command: NetCommand) {
        match command {
            NetCommand::Msg { to, text } => self.send_text(to, text).await,
            NetCommand::Img { to, path } => {
                if let Err(err) = self.send_image(&to, &path).await {
                    self.emit(NetEvent::Error {
                        message: format!("sending {} to {to} failed: {err}", path.display()),
                    });
                }
            }
            NetCommand::Leave => self.leave().await,
            NetCommand::Afk(away) => self.set_away(away).await,
            NetCommand::Exit => {}
        }
    }

    async fn send_text(&mut self, to: String, text: String) {
        let targets = if to == BROADCAST_HANDLE {
            self.peers.others(&self.handle)
        } else {
            match self.peers.get(&to) {
                Some(peer) => vec![peer],
                None => {
                    self.emit(NetEvent::Error {
                        message: format!("unknown recipient {to}"),
                    });
                    return;
                }
            }
        };
        let message = Message::Msg {
            from: self.handle.clone(),
            to,
            text,
        };
        for peer in targets {
            if self.send(message.clone(), peer.addr()).await {
                MESSAGES_SENT.click();
            }
        }
    }

    async fn send_image(&mut self, to: &str, path: &Path) -> Result<()> {
        let peer = self.peers.get(to).ok_or_else(|| {
            Error::not_found(
                "unknown recipient",
                Some("peer".to_string()),
                Some(to.to_string()),
            )
        })?;
        let data = transfer::load_image(path).await?;
        let size = data.len() as u64;
        let (tcp_port, _upload) = transfer::serve_once(data, transfer::ACCEPT_TIMEOUT).await?;
        let offer = Message::Img {
            from: self.handle.clone(),
            to: to.to_string(),
            tcp_port,
            size,
        };
        self.socket.send((offer, peer.addr())).await?;
        IMAGES_SENT.click();
        self.emit(NetEvent::ImgSent {
            to: to.to_string(),
            path: path.to_path_buf(),
        });
        Ok(())
    }

    async fn leave(&mut self) {
        let leave = Message::Leave {
            handle: self.handle.clone(),
        };
        for peer in self.peers.others(&self.handle) {
            self.send(leave.clone(), peer.addr()).await;
        }
        if let Some(addr) = self.leave_broadcast {
            self.send(leave, addr).await;
        }
    }

    async fn set_away(&mut self, away: bool) {
        self.away = away;
        if !away {
            self.autoreplied.clear();
        }
        tracing::info!("AFK {}", if away { "on" } else { "off" });
        let notice = format!(
            "[AFK] {} is now {}",
            self.handle,
            if away { "away" } else { "back" }
        );
        self.send_text(BROADCAST_HANDLE.to_string(), notice).await;
    }

    async fn handle_datagram(&mut self, message: Message, from: SocketAddr) {
        tracing::debug!("recv {message} from {from}");
        match message {
            Message::Msg {
                from: sender,
                to,
                text,
            } if sender != self.handle && (to == self.handle || to == BROADCAST_HANDLE) => {
                MESSAGES_RECEIVED.click();
                let direct = to == self.handle;
                self.emit(NetEvent::Msg {
                    from: sender.clone(),
                    to,
                    text,
                });
                if direct {
                    self.maybe_autoreply(sender, from).await;
                }
            }
            Message::Img {
                from: sender,
                to,
                tcp_port,
                size,
            } if to == self.handle => {
                self.spawn_image_fetch(sender, SocketAddr::new(from.ip(), tcp_port), size);
            }
            Message::Leave { handle } if handle != self.handle => {
                self.peers.remove(&handle);
                self.emit(NetEvent::Leave { handle });
            }
            Message::Join { handle, port } if handle != self.handle => {
                self.peers.upsert(Peer::new(handle, from.ip(), port));
            }
            _ => DATAGRAMS_IGNORED.click(),
        }
    }

    async fn maybe_autoreply(&mut self, sender: String, addr: SocketAddr) {
        if !self.away || self.autoreply.is_empty() || !self.autoreplied.insert(sender.clone()) {
            return;
        }
        let reply = Message::Msg {
            from: self.handle.clone(),
            to: sender,
            text: self.autoreply.clone(),
        };
        if self.send(reply, addr).await {
            AUTOREPLIES_SENT.click();
        }
    }

    fn spawn_image_fetch(&self, sender: String, addr: SocketAddr, size: u64) {
        let image_dir = self.image_dir.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = async {
                let data = transfer::fetch(addr, size, transfer::FETCH_TIMEOUT).await?;
                transfer::store_image(&image_dir, &sender, &data).await
            }
            .await;
            let event = match result {
                Ok(path) => {
                    IMAGES_RECEIVED.click();
                    NetEvent::Img { from: sender, path }
                }
                Err(err) => {
                    tracing::warn!("image from {sender} failed: {err}");
                    NetEvent::Error {
                        message: format!("image from {sender} failed: {err}"),
                    }
                }
            };
            let _ = events.send(event);
        });
    }

    async fn send(&mut self, message: Message, to: SocketAddr) -> bool {
        match self.socket.send((message, to)).await {
            Ok(()) => true,
            Err(err) => {
                SEND_ERRORS.click();
                tracing::debug!("send to {to} failed: {err}");
                false
            }
        }
    }

    fn emit(&self, event: NetEvent) {
        // The front end may already be gone during shutdown.
        let _ = self.events.send(event);
    }
}
