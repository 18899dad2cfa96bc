mod assembler;

use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};
use rand::seq::SliceRandom;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, sleep, sleep_until};

use crate::client::Shared;
use crate::error::PeerError;
use crate::message::{Block, BlockData, Message};
use crate::peer::{ConnectionManager, Peer};
use crate::storage::combine_pieces;

pub use assembler::{Assembler, Status};

const RETRY_BASE: Duration = Duration::from_millis(50);

/// Delay before re-queueing a piece after its `failures`-th consecutive
/// failed attempt: nothing the first time, then 50ms doubling up to `cap`.
pub fn retry_delay(failures: u32, cap: Duration) -> Duration {
    if failures <= 1 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(failures - 2).unwrap_or(u32::MAX);
    RETRY_BASE.saturating_mul(factor).min(cap)
}

/// Drives the needed-pieces queue: a pool of workers requests the blocks of
/// one piece at a time from capable peers and puts the piece back if it does
/// not complete in time.
#[derive(Clone)]
pub struct DownloadManager {
    shared: Arc<Shared>,
}

impl DownloadManager {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Queues every missing piece in random order. Returns how many.
    pub fn schedule_missing(&self) -> usize {
        let mut missing = self.shared.state().assembler.missing_pieces();
        missing.shuffle(&mut rand::rng());
        for index in &missing {
            let _ = self.shared.needed.send(*index);
        }
        missing.len()
    }

    pub fn bitmap(&self) -> Vec<bool> {
        self.shared.state().assembler.bitmap().to_vec()
    }

    pub fn start(&self, needed: UnboundedReceiver<usize>) {
        let needed = Arc::new(tokio::sync::Mutex::new(needed));
        for id in 0..self.shared.config.download_workers {
            tokio::spawn(self.clone().worker(id, Arc::clone(&needed)));
        }
    }

    async fn worker(self, id: usize, needed: Arc<tokio::sync::Mutex<UnboundedReceiver<usize>>>) {
        let token = self.shared.shutdown.clone();
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = async { needed.lock().await.recv().await } => next,
            };
            let Some(index) = next else {
                break;
            };
            trace!("worker {} picked piece {}", id, index);
            if !self.attempt(index).await && !token.is_cancelled() {
                self.requeue(index);
            }
        }
        debug!("worker {} stopped", id);
    }

    /// One try at piece `index`. Returns whether the piece is owned afterwards.
    async fn attempt(&self, index: usize) -> bool {
        if self.shared.state().assembler.has_piece(index) {
            return true;
        }
        if self.request_missing_blocks(index) == 0 {
            return false;
        }

        let deadline = Instant::now() + self.shared.config.piece_timeout;
        loop {
            let mut completed = pin!(self.shared.piece_completed.notified());
            completed.as_mut().enable();
            if self.shared.state().assembler.has_piece(index) {
                return true;
            }
            tokio::select! {
                _ = completed => continue,
                _ = sleep_until(deadline) => break,
                _ = self.shared.shutdown.cancelled() => return false,
            }
        }
        self.shared.state().assembler.has_piece(index)
    }

    /// Requests every missing block of `index`, each from the first capable
    /// peer in a fresh random order. Returns how many requests were queued.
    fn request_missing_blocks(&self, index: usize) -> usize {
        let (blocks, mut peers) = {
            let state = self.shared.state();
            let peers: Vec<Arc<Peer>> = state.peers.values().cloned().collect();
            (state.assembler.missing_blocks(index), peers)
        };

        let mut rng = rand::rng();
        let mut requested = 0;
        for block in blocks {
            peers.shuffle(&mut rng);
            let Some(peer) = peers.iter().find(|peer| peer.can_serve(index)) else {
                trace!("no peer can serve piece {}", index);
                break;
            };
            trace!("[{}] requesting {:?}", peer.addr, block);
            if peer.try_send(Message::Request(block)) {
                requested += 1;
            }
        }
        requested
    }

    fn requeue(&self, index: usize) {
        let delay = {
            let mut state = self.shared.state();
            let failures = state.failed_attempts.entry(index).or_insert(0);
            *failures += 1;
            retry_delay(*failures, self.shared.config.max_retry_backoff)
        };
        trace!("piece {} back in queue in {:?}", index, delay);
        if delay.is_zero() {
            let _ = self.shared.needed.send(index);
            return;
        }
        let needed = self.shared.needed.clone();
        let token = self.shared.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => {
                    let _ = needed.send(index);
                }
                _ = token.cancelled() => (),
            }
        });
    }

    /// Stores a block received from `from`, committing the piece once every
    /// slot is filled and the hash matches.
    pub async fn save_block(&self, from: SocketAddr, block: BlockData) {
        let index = block.index;
        let length = block.data.len();
        let status = {
            let mut state = self.shared.state();
            let status = state.assembler.add_block(block);
            if status != Status::Ignored {
                state.downloaded += length;
                let update = format!("received block in piece {} from {}", index, from);
                state.log_update(update, self.shared.config.status_log_size);
            }
            if status == Status::Complete {
                state.failed_attempts.remove(&index);
            }
            status
        };

        match status {
            Status::Ignored => trace!("[{}] ignoring block of piece {}", from, index),
            Status::Incomplete => (),
            Status::Invalid => warn!("[{}] {}", from, PeerError::HashMismatch(index)),
            Status::Complete => {
                info!("piece {} completed", index);
                self.shared.piece_completed.notify_waiters();
                ConnectionManager::new(Arc::clone(&self.shared)).broadcast(Message::Have(index));
                if let Err(err) = self.persist().await {
                    warn!("unable to persist state: {}", err);
                }
                self.finish().await;
            }
        }
    }

    /// Answers a request if we own the block and are not choking the peer.
    pub fn send_block(&self, peer: &Peer, block: Block) {
        if peer.status().am_choking {
            trace!("[{}] choked, ignoring {:?}", peer.addr, block);
            return;
        }
        let data = self.shared.state().assembler.read_block(&block);
        let Some(data) = data else {
            trace!("[{}] cannot serve {:?}", peer.addr, block);
            return;
        };
        let length = data.len();
        if peer.try_send(Message::Piece(BlockData::new(block.index, block.begin, data))) {
            self.shared.state().uploaded += length;
        }
    }

    pub async fn persist(&self) -> anyhow::Result<()> {
        let _guard = self.shared.persisting.lock().await;
        let snapshot = self.shared.state().assembler.snapshot().encode();
        self.shared.persister.save_state(snapshot).await
    }

    /// Writes the output file and signals completion, once, when every piece
    /// is owned. Does nothing otherwise.
    pub async fn finish(&self) {
        let output = {
            let mut state = self.shared.state();
            if state.combined || !state.assembler.is_complete() {
                return;
            }
            state.combined = true;
            self.shared
                .config
                .output_path
                .clone()
                .map(|path| (path, state.assembler.pieces().to_vec()))
        };
        if let Some((path, pieces)) = output {
            match combine_pieces(&path, &pieces, self.shared.info.length).await {
                Ok(()) => info!("wrote {}", path.display()),
                Err(err) => warn!("unable to write {}: {}", path.display(), err),
            }
        }
        info!("download complete");
        self.shared.finished.send_replace(true);
    }
}
