use std::io::Result;

use tokio::io::AsyncRead;

/// A trait for values that can be decoded from an async stream.
pub trait AsyncDecoder: Sized {
    /// Decodes a value from an async stream.
    async fn decode<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self>;
}

/// A trait for messages that can be transported over a network connection.
pub trait TransportMessage {
    /// Returns the total number of bytes needed to transport this message,
    /// including any length prefixes, message IDs, and payload data.
    fn transport_bytes(&self) -> usize;
}
