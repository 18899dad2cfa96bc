mod config;
mod status;
mod tracking;

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use log::info;
use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::download::{Assembler, DownloadManager};
use crate::error::PeerError;
use crate::message::Message;
use crate::peer::{ConnectionManager, Peer};
use crate::storage::{Layout, Persister, Piece, SavedState, split_into_pieces};
use crate::torrent::Info;
use crate::tracker::Tracker;
use crate::transport;

pub use config::Config;
pub use status::Status;

/// Everything guarded by the client-wide lock.
pub struct State {
    pub peers: HashMap<SocketAddr, Arc<Peer>>,
    pub assembler: Assembler,
    /// Consecutive failed attempts per piece, for the retry backoff.
    pub failed_attempts: HashMap<usize, u32>,
    pub updates: VecDeque<String>,
    /// Set once the output file has been written.
    pub combined: bool,
    pub uploaded: usize,
    pub downloaded: usize,
}

impl State {
    pub fn log_update(&mut self, update: String, max: usize) {
        self.updates.push_back(update);
        while self.updates.len() > max {
            self.updates.pop_front();
        }
    }
}

/// Client state shared by every task. The lock is a `std` mutex: its guard
/// cannot live across an `.await` in a spawned task.
pub struct Shared {
    pub config: Config,
    pub info: Info,
    pub layout: Layout,
    state: Mutex<State>,
    pub persister: Arc<dyn Persister>,
    /// Serializes writes to the persister so snapshots land in order.
    pub persisting: tokio::sync::Mutex<()>,
    pub shutdown: CancellationToken,
    pub needed: mpsc::UnboundedSender<usize>,
    /// Woken whenever some piece is verified.
    pub piece_completed: Notify,
    pub finished: watch::Sender<bool>,
    pub local_addr: SocketAddr,
}

impl Shared {
    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Longest frame a peer may send: a full block or a full bitfield.
    pub fn max_frame_length(&self) -> usize {
        let bitfield = self.info.total_pieces().div_ceil(8);
        self.config.block_size_bytes().max(bitfield) + 13
    }
}

/// A running client for one torrent: listens for peers, downloads what is
/// missing and serves what it has until shut down or dropped.
pub struct Client {
    shared: Arc<Shared>,
    connections: ConnectionManager,
}

impl Client {
    pub async fn start(
        info: Info,
        config: Config,
        persister: Arc<dyn Persister>,
        tracker: Option<Arc<dyn Tracker>>,
    ) -> Result<Self> {
        let layout = info.layout(config.block_size);
        let mut assembler = Assembler::new(layout, info.pieces.clone());
        if let Some(seed_path) = &config.seed_path {
            let pieces = split_into_pieces(seed_path, &layout).await?;
            assembler.seed(pieces)?;
            info!("seeding {} from {}", info.name, seed_path.display());
        } else {
            let saved = persister.read_state().await?;
            if !saved.is_empty() {
                let restored = assembler.restore(SavedState::decode(&saved)?)?;
                info!("resumed {} of {} pieces", restored, info.total_pieces());
            }
        }

        let listener = transport::listen(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let (needed, needed_rx) = mpsc::unbounded_channel();
        let (finished, _) = watch::channel(false);
        let shutdown = CancellationToken::new();
        let shared = Arc::new(Shared {
            config,
            info,
            layout,
            state: Mutex::new(State {
                peers: HashMap::new(),
                assembler,
                failed_attempts: HashMap::new(),
                updates: VecDeque::new(),
                combined: false,
                uploaded: 0,
                downloaded: 0,
            }),
            persister,
            persisting: tokio::sync::Mutex::new(()),
            shutdown: shutdown.clone(),
            needed,
            piece_completed: Notify::new(),
            finished,
            local_addr,
        });

        let downloads = DownloadManager::new(Arc::clone(&shared));
        downloads.persist().await?;
        let scheduled = downloads.schedule_missing();
        info!("{} pieces to download", scheduled);
        downloads.start(needed_rx);
        downloads.finish().await;

        let connections = ConnectionManager::new(Arc::clone(&shared));
        let acceptor = connections.clone();
        tokio::spawn(transport::serve(listener, shutdown, move |socket, addr| {
            let connections = acceptor.clone();
            async move { connections.accept(socket, addr).await }
        }));
        if let Some(tracker) = tracker {
            tokio::spawn(tracking::heartbeat(Arc::clone(&shared), tracker));
        }

        Ok(Self {
            shared,
            connections,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    pub fn bitmap(&self) -> Vec<bool> {
        self.shared.state().assembler.bitmap().to_vec()
    }

    #[cfg(test)]
    pub(crate) fn connections(&self) -> ConnectionManager {
        self.connections.clone()
    }

    pub fn is_done(&self) -> bool {
        *self.shared.finished.borrow()
    }

    /// Resolves once every piece is verified and the output is written.
    pub async fn wait_until_done(&self) {
        let mut finished = self.shared.finished.subscribe();
        // the sender lives in `shared`, so the channel outlives this wait
        let _ = finished.wait_for(|done| *done).await;
    }

    /// Sends `message` to the peer at `addr`, dialling it first if needed.
    pub async fn send_peer_message(
        &self,
        addr: SocketAddr,
        message: Message,
    ) -> std::result::Result<(), PeerError> {
        self.connections.send_peer_message(addr, message).await
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.connections.peers().iter().map(|peer| peer.addr).collect()
    }

    pub fn status(&self) -> Status {
        let state = self.shared.state();
        Status {
            name: self.shared.info.name.clone(),
            bitmap: state.assembler.bitmap().to_vec(),
            peers: state.peers.len(),
            uploaded: state.uploaded,
            downloaded: state.downloaded,
            updates: state.updates.iter().cloned().collect(),
        }
    }

    pub fn pieces(&self) -> Vec<Piece> {
        self.shared.state().assembler.pieces().to_vec()
    }

    pub fn shutdown(&self) {
        info!("shutting down...");
        self.shared.shutdown.cancel();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}
