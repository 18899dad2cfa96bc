use std::net::SocketAddr;
use std::{path::PathBuf, time::Duration};

use size::Size;

use crate::core::PeerId;

/// Configuration settings for the client
#[derive(Clone, Debug)]
pub struct Config {
    // Identity and Network Settings
    /// Unique identifier for this client in the swarm
    pub client_id: PeerId,
    /// Address to listen on for incoming connections
    pub listen_addr: SocketAddr,
    /// Where the reassembled file is written once every piece is verified
    pub output_path: Option<PathBuf>,
    /// Complete copy of the file to seed from
    pub seed_path: Option<PathBuf>,

    // Download Settings
    /// Size of data blocks for piece transfers
    pub block_size: Size,
    /// Number of workers pulling pieces off the needed-pieces queue
    pub download_workers: usize,
    /// How long a worker waits for a piece before putting it back
    pub piece_timeout: Duration,
    /// Upper bound for the delay before a repeatedly failing piece is retried
    pub max_retry_backoff: Duration,

    // Connection Settings
    /// Time without any inbound message after which a peer is dropped.
    /// Keep-alives are sent every third of it.
    pub peer_timeout: Duration,
    /// Timeout for establishing new connections, handshake included
    pub connect_timeout: Duration,
    /// Size of the outbound message queue of each peer
    pub channel_buffer: usize,

    // Tracker Settings
    /// Delay before announcing again after a failed announce
    pub tracker_retry_interval: Duration,

    /// Number of recent block events kept for the status view
    pub status_log_size: usize,
}

#[allow(dead_code)]
impl Config {
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_seed_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.seed_path = Some(path.into());
        self
    }

    pub fn with_block_size(mut self, size: Size) -> Self {
        self.block_size = size;
        self
    }

    pub fn with_download_workers(mut self, n: usize) -> Self {
        self.download_workers = n;
        self
    }

    pub fn with_piece_timeout(mut self, timeout: Duration) -> Self {
        self.piece_timeout = timeout;
        self
    }

    pub fn with_max_retry_backoff(mut self, backoff: Duration) -> Self {
        self.max_retry_backoff = backoff;
        self
    }

    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_channel_buffer(mut self, n: usize) -> Self {
        self.channel_buffer = n;
        self
    }

    pub fn with_tracker_retry_interval(mut self, interval: Duration) -> Self {
        self.tracker_retry_interval = interval;
        self
    }

    pub fn with_status_log_size(mut self, n: usize) -> Self {
        self.status_log_size = n;
        self
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            client_id: PeerId::random(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 6881)),
            output_path: None,
            seed_path: None,
            block_size: Size::from_kibibytes(16),
            download_workers: 5,
            piece_timeout: Duration::from_millis(500),
            max_retry_backoff: Duration::from_secs(2),
            peer_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_millis(100),
            channel_buffer: 256,
            tracker_retry_interval: Duration::from_secs(5),
            status_log_size: 10,
        }
    }

    /// Keep-alive period of the sender task.
    pub fn keep_alive_interval(&self) -> Duration {
        self.peer_timeout / 3
    }

    pub fn block_size_bytes(&self) -> usize {
        self.block_size.bytes() as usize
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
