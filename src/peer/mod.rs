mod connection;
mod connection_manager;
mod dispatcher;

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{trace, warn};
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::core::PeerId;
use crate::error::{PeerError, Result};
use crate::message::Message;

pub use connection_manager::ConnectionManager;

/// Choke and interest flags, seen from our side of the connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// We refuse to serve the peer's requests.
    pub am_choking: bool,
    pub am_interested: bool,
    /// The peer refuses to serve our requests.
    pub peer_choking: bool,
    pub peer_interested: bool,
}

#[derive(Debug)]
struct PeerState {
    bitfield: Vec<bool>,
    status: Status,
}

/// A remote endpoint with an established connection.
///
/// The peer guards its own bitfield and flags, so reading them never needs
/// the client lock. Outbound traffic goes through `queue`, drained by the
/// connection's sender task; every inbound message pings `keep_alive`.
#[derive(Debug)]
pub struct Peer {
    pub addr: SocketAddr,
    pub peer_id: PeerId,
    state: Mutex<PeerState>,
    queue: Sender<Message>,
    keep_alive: Sender<()>,
    token: CancellationToken,
}

/// Receiving ends of a peer's channels, handed to its connection tasks.
pub struct PeerChannels {
    pub queue: Receiver<Message>,
    pub keep_alive: Receiver<()>,
}

impl Peer {
    pub fn new(
        addr: SocketAddr,
        peer_id: PeerId,
        num_pieces: usize,
        channel_buffer: usize,
        parent: &CancellationToken,
    ) -> (Self, PeerChannels) {
        let (queue_tx, queue_rx) = mpsc::channel(channel_buffer.max(1));
        let (keep_alive_tx, keep_alive_rx) = mpsc::channel(1);
        let peer = Self {
            addr,
            peer_id,
            state: Mutex::new(PeerState {
                bitfield: vec![false; num_pieces],
                status: Status::default(),
            }),
            queue: queue_tx,
            keep_alive: keep_alive_tx,
            token: parent.child_token(),
        };
        let channels = PeerChannels {
            queue: queue_rx,
            keep_alive: keep_alive_rx,
        };
        (peer, channels)
    }

    fn state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn has_piece(&self, index: usize) -> bool {
        self.state().bitfield.get(index).copied().unwrap_or(false)
    }

    /// Whether a request for `index` sent now could be answered.
    pub fn can_serve(&self, index: usize) -> bool {
        let state = self.state();
        !state.status.peer_choking && state.bitfield.get(index).copied().unwrap_or(false)
    }

    /// Records a `have`. Returns whether the piece is new for this peer.
    pub fn set_has_piece(&self, index: usize) -> Result<bool> {
        let mut state = self.state();
        let num_pieces = state.bitfield.len();
        let bit = state.bitfield.get_mut(index).ok_or_else(|| {
            PeerError::ProtocolViolation(format!(
                "have for piece {} of {}",
                index, num_pieces
            ))
        })?;
        Ok(!std::mem::replace(bit, true))
    }

    pub fn set_bitfield(&self, mut bitfield: Vec<bool>) {
        let mut state = self.state();
        bitfield.resize(state.bitfield.len(), false);
        state.bitfield = bitfield;
    }

    pub fn bitfield(&self) -> Vec<bool> {
        self.state().bitfield.clone()
    }

    /// Whether the peer has any piece that `owned` lacks.
    pub fn has_any_missing(&self, owned: &[bool]) -> bool {
        let state = self.state();
        state
            .bitfield
            .iter()
            .zip(owned)
            .any(|(theirs, ours)| *theirs && !*ours)
    }

    pub fn status(&self) -> Status {
        self.state().status
    }

    pub fn set_peer_choking(&self, choking: bool) {
        self.state().status.peer_choking = choking;
    }

    pub fn set_peer_interested(&self, interested: bool) {
        self.state().status.peer_interested = interested;
    }

    pub fn set_am_choking(&self, choking: bool) {
        self.state().status.am_choking = choking;
    }

    /// Flips `am_interested` on. Returns false if it already was.
    pub fn mark_interested(&self) -> bool {
        let mut state = self.state();
        !std::mem::replace(&mut state.status.am_interested, true)
    }

    /// Queues `message` without waiting. A full queue drops the message; the
    /// download manager re-requests anything that goes missing.
    pub fn try_send(&self, message: Message) -> bool {
        match self.queue.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                warn!("[{}] queue full, dropping {:?}", self.addr, message);
                false
            }
            Err(TrySendError::Closed(message)) => {
                trace!("[{}] connection gone, dropping {:?}", self.addr, message);
                false
            }
        }
    }

    pub fn refresh_keep_alive(&self) {
        // a pending signal already covers this one
        let _ = self.keep_alive.try_send(());
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}
