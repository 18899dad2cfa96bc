use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use log::{info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::{PeerError, Result};
use crate::message::{HANDSHAKE_TAIL, LENGTH_SIZE};

/// Reads one length-prefixed frame and returns it whole, prefix included.
///
/// Returns `None` if the stream ends cleanly before the first byte. A frame
/// declaring more than `max_length` bytes after the prefix is rejected before
/// anything is allocated for it.
pub async fn read_message<S>(stream: &mut S, max_length: usize) -> Result<Option<Vec<u8>>>
where
    S: AsyncRead + Unpin,
{
    let mut prefix = [0; LENGTH_SIZE];
    let read = stream.read(&mut prefix).await?;
    if read == 0 {
        return Ok(None);
    }
    stream.read_exact(&mut prefix[read..]).await?;

    let length = u32::from_be_bytes(prefix) as usize;
    if length > max_length {
        return Err(PeerError::ProtocolViolation(format!(
            "frame of {} bytes exceeds maximum of {}",
            length, max_length
        )));
    }

    let mut frame = vec![0; LENGTH_SIZE + length];
    frame[..LENGTH_SIZE].copy_from_slice(&prefix);
    stream.read_exact(&mut frame[LENGTH_SIZE..]).await?;
    Ok(Some(frame))
}

pub async fn read_handshake<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let pstrlen = stream.read_u8().await?;
    let mut bytes = vec![0; 1 + (pstrlen as usize) + HANDSHAKE_TAIL];
    bytes[0] = pstrlen;
    stream.read_exact(&mut bytes[1..]).await?;
    Ok(bytes)
}

pub async fn write_message<S>(stream: &mut S, bytes: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(bytes).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn dial(addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let socket = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
    Ok(socket)
}

pub async fn listen(addr: SocketAddr) -> io::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Accepts connections until `token` is cancelled, running `handler` for each
/// one in its own task.
pub async fn serve<F, Fut>(listener: TcpListener, token: CancellationToken, handler: F)
where
    F: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, addr)) => {
                    tokio::spawn(handler(socket, addr));
                }
                Err(err) => warn!("failed to accept connection: {}", err),
            },
            _ = token.cancelled() => break,
        }
    }
}
