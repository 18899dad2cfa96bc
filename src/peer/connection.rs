use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;

use crate::error::{PeerError, Result};
use crate::message::{Handshake, Message};
use crate::peer::dispatcher::Dispatcher;
use crate::peer::{ConnectionManager, Peer, PeerChannels};
use crate::transport::{read_handshake, read_message, write_message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We dialled; our handshake goes first.
    Outbound,
    /// They dialled; theirs is checked before we answer.
    Inbound,
}

/// Exchanges handshakes and returns the remote one once it checks out
/// against `local`.
pub async fn handshake<S>(socket: &mut S, local: &Handshake, direction: Direction) -> Result<Handshake>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if direction == Direction::Outbound {
        write_message(socket, &local.encode()).await?;
    }
    let remote = Handshake::decode(&read_handshake(socket).await?)?;
    remote.validate(&local.info_hash)?;
    if direction == Direction::Inbound {
        write_message(socket, &local.encode()).await?;
    }
    Ok(remote)
}

/// Starts the sender, the keep-alive watchdog and the receiver of an
/// established peer. Whichever ends first takes the peer down.
pub fn spawn(manager: ConnectionManager, peer: Arc<Peer>, socket: TcpStream, channels: PeerChannels) {
    let (reader, writer) = socket.into_split();
    tokio::spawn(run_sender(manager.clone(), Arc::clone(&peer), writer, channels.queue));
    tokio::spawn(run_watchdog(manager.clone(), Arc::clone(&peer), channels.keep_alive));
    tokio::spawn(run_receiver(manager, peer, reader));
}

async fn run_sender(
    manager: ConnectionManager,
    peer: Arc<Peer>,
    writer: OwnedWriteHalf,
    queue: Receiver<Message>,
) {
    if let Err(err) = send_messages(&manager, &peer, writer, queue).await {
        warn!("[{}] error while sending: {}", peer.addr, err);
    }
    manager.disconnect(&peer);
}

async fn send_messages(
    manager: &ConnectionManager,
    peer: &Peer,
    mut writer: OwnedWriteHalf,
    mut queue: Receiver<Message>,
) -> Result<()> {
    let token = peer.token();
    let interval = manager.shared().config.keep_alive_interval();
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            next = timeout(interval, queue.recv()) => match next {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(()),
                Err(_) => Message::KeepAlive,
            },
        };
        debug!("[{}] > sending {:?}", peer.addr, message);
        let bytes = message.to_bytes();
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            written = write_message(&mut writer, &bytes) => written?,
        }
    }
}

async fn run_watchdog(manager: ConnectionManager, peer: Arc<Peer>, mut keep_alive: Receiver<()>) {
    let token = peer.token();
    let peer_timeout = manager.shared().config.peer_timeout;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            signal = timeout(peer_timeout, keep_alive.recv()) => match signal {
                Ok(Some(())) => continue,
                Ok(None) => break,
                Err(_) => {
                    warn!("[{}] {}", peer.addr, PeerError::KeepAliveTimeout(peer_timeout));
                    break;
                }
            },
        }
    }
    manager.disconnect(&peer);
}

async fn run_receiver(manager: ConnectionManager, peer: Arc<Peer>, reader: OwnedReadHalf) {
    if let Err(err) = receive_messages(&manager, &peer, reader).await {
        warn!("[{}] error while receiving: {}", peer.addr, err);
    }
    manager.disconnect(&peer);
}

async fn receive_messages(
    manager: &ConnectionManager,
    peer: &Arc<Peer>,
    mut reader: OwnedReadHalf,
) -> Result<()> {
    let token = peer.token();
    let shared = manager.shared();
    let max_length = shared.max_frame_length();
    let num_pieces = shared.info.total_pieces();
    let dispatcher = Dispatcher::new(manager.clone(), Arc::clone(peer));
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            frame = read_message(&mut reader, max_length) => frame?,
        };
        let Some(frame) = frame else {
            info!("[{}] socket closed, shutting down...", peer.addr);
            return Ok(());
        };
        let message = Message::decode(&frame, num_pieces)?;
        peer.refresh_keep_alive();
        debug!("[{}] < got {:?}", peer.addr, message);
        dispatcher.apply(message).await?;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::duplex;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    use crate::client::Client;
    use crate::client::tests::{test_config, test_data, test_info};
    use crate::core::{PeerId, Sha1};
    use crate::storage::MemoryPersister;

    use super::*;

    #[tokio::test]
    async fn exchange_handshakes() {
        let (mut client, mut server) = duplex(256);
        let info_hash = Sha1([7; 20]);
        let outbound = Handshake::new(info_hash.clone(), PeerId([1; 20]));
        let inbound = Handshake::new(info_hash, PeerId([2; 20]));

        let (dialled, accepted) = tokio::join!(
            handshake(&mut client, &outbound, Direction::Outbound),
            handshake(&mut server, &inbound, Direction::Inbound),
        );

        assert_eq!(dialled.unwrap().peer_id, PeerId([2; 20]));
        assert_eq!(accepted.unwrap().peer_id, PeerId([1; 20]));
    }

    #[tokio::test]
    async fn inbound_rejects_foreign_torrent_without_reply() {
        let (mut client, mut server) = duplex(256);
        let outbound = Handshake::new(Sha1([7; 20]), PeerId([1; 20]));
        let inbound = Handshake::new(Sha1([8; 20]), PeerId([2; 20]));

        write_message(&mut client, &outbound.encode()).await.unwrap();
        let result = handshake(&mut server, &inbound, Direction::Inbound).await;
        assert!(matches!(result, Err(PeerError::MalformedHandshake(_))));

        drop(server);
        let reply = read_handshake(&mut client).await;
        assert!(matches!(reply, Err(PeerError::Connection(_))));
    }

    #[tokio::test]
    async fn sender_drains_queue_then_keeps_alive() {
        let data = test_data();
        let client = Client::start(
            test_info(&data),
            test_config(),
            Arc::new(MemoryPersister::new()),
            None,
        )
        .await
        .unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (dialled, accepted) = tokio::join!(
            TcpStream::connect(listener.local_addr().unwrap()),
            listener.accept()
        );
        let (_, writer) = dialled.unwrap().into_split();
        let (mut remote, remote_addr) = accepted.unwrap();

        let token = CancellationToken::new();
        let (peer, channels) = Peer::new(remote_addr, PeerId([3; 20]), 4, 8, &token);
        let peer = Arc::new(peer);
        assert!(peer.try_send(Message::Have(2)));
        tokio::spawn(run_sender(client.connections(), Arc::clone(&peer), writer, channels.queue));

        let frame = read_message(&mut remote, 16).await.unwrap();
        assert_eq!(frame, Some(Message::Have(2).to_bytes()));

        // idle for a third of the peer timeout
        let frame = timeout(Duration::from_secs(2), read_message(&mut remote, 16))
            .await
            .expect("no keep-alive")
            .unwrap();
        assert_eq!(frame, Some(Message::KeepAlive.to_bytes()));

        peer.close();
        let end = timeout(Duration::from_secs(2), read_message(&mut remote, 16))
            .await
            .expect("sender kept the socket open")
            .unwrap();
        assert_eq!(end, None);
    }
}
