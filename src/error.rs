use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while talking to a single remote peer.
///
/// None of these are fatal to the client: the connection that produced the
/// error is closed, the peer is forgotten, and any work it was serving is
/// retried elsewhere.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Bad length, non-zero reserved bytes or a foreign info hash.
    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    /// The buffer ended before the length the message declared.
    #[error("truncated message: declared {declared} bytes, {available} available")]
    TruncatedMessage { declared: usize, available: usize },

    /// Socket failure, including the remote closing mid-frame.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// A completed piece did not hash to the expected digest.
    #[error("piece {0} failed hash verification")]
    HashMismatch(usize),

    #[error("nothing received from peer for {0:?}")]
    KeepAliveTimeout(Duration),

    /// Unknown message type, inconsistent length or out-of-range index.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
