use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{info, warn};
use tokio::net::TcpStream;

use crate::client::Shared;
use crate::error::{PeerError, Result};
use crate::message::{Handshake, Message};
use crate::peer::connection::{self, Direction};
use crate::peer::Peer;
use crate::transport;

/// Owns the map of established peers. Cheap to clone; every clone works on
/// the same client state.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Returns the peer at `addr`, dialling it first if it is unknown.
    pub async fn connect(&self, addr: SocketAddr) -> Result<Arc<Peer>> {
        if let Some(peer) = self.get(&addr) {
            return Ok(peer);
        }
        info!("connecting to {}...", addr);
        let socket = transport::dial(addr, self.shared.config.connect_timeout).await?;
        self.establish(socket, addr, Direction::Outbound).await
    }

    /// Handles a socket from the accept loop. Rejections are logged, never
    /// registered.
    pub async fn accept(&self, socket: TcpStream, addr: SocketAddr) {
        info!("accepted connection from {}", addr);
        if let Err(err) = self.establish(socket, addr, Direction::Inbound).await {
            warn!("[{}] rejected: {}", addr, err);
        }
    }

    async fn establish(
        &self,
        mut socket: TcpStream,
        addr: SocketAddr,
        direction: Direction,
    ) -> Result<Arc<Peer>> {
        let config = &self.shared.config;
        let local = Handshake::new(self.shared.info.info_hash.clone(), config.client_id.clone());
        let remote = tokio::time::timeout(
            config.connect_timeout,
            connection::handshake(&mut socket, &local, direction),
        )
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "handshake timed out"))??;
        if remote.peer_id == config.client_id {
            return Err(PeerError::MalformedHandshake("connected to self".to_string()));
        }

        let (peer, channels) = Peer::new(
            addr,
            remote.peer_id,
            self.shared.info.total_pieces(),
            config.channel_buffer,
            &self.shared.shutdown,
        );
        let peer = Arc::new(peer);
        let bitfield = {
            let mut state = self.shared.state();
            // an inbound peer sits under its ephemeral port, so a dial to its
            // listen address only shows up as a duplicate by id
            let existing = state
                .peers
                .get(&addr)
                .or_else(|| state.peers.values().find(|known| known.peer_id == peer.peer_id));
            if let Some(existing) = existing {
                info!(
                    "[{}] already connected as {}, closing new connection",
                    addr, existing.addr
                );
                return Ok(Arc::clone(existing));
            }
            state.peers.insert(addr, Arc::clone(&peer));
            state.assembler.bitmap().to_vec()
        };
        info!("[{}] connected ({:?})", addr, direction);

        peer.try_send(Message::Bitfield(bitfield));
        connection::spawn(self.clone(), Arc::clone(&peer), socket, channels);
        Ok(peer)
    }

    /// Closes the peer's connection and forgets it, unless a newer
    /// connection already took its place in the map.
    pub fn disconnect(&self, peer: &Arc<Peer>) {
        peer.close();
        let removed = {
            let mut state = self.shared.state();
            let current = state
                .peers
                .get(&peer.addr)
                .is_some_and(|current| Arc::ptr_eq(current, peer));
            if current {
                state.peers.remove(&peer.addr);
            }
            current
        };
        if removed {
            info!("peer {} disconnected", peer.addr);
        }
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<Arc<Peer>> {
        self.shared.state().peers.get(addr).cloned()
    }

    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.shared.state().peers.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.shared.state().peers.len()
    }

    pub fn broadcast(&self, message: Message) {
        for peer in self.peers() {
            peer.try_send(message.clone());
        }
    }

    pub async fn send_peer_message(&self, addr: SocketAddr, message: Message) -> Result<()> {
        let peer = self.connect(addr).await?;
        peer.try_send(message);
        Ok(())
    }
}
