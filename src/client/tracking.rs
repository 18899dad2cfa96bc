use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::time::{sleep, timeout};

use crate::client::Shared;
use crate::message::Message;
use crate::peer::ConnectionManager;
use crate::tracker::{Announce, Event, Peer, Tracker};

/// Announces to the tracker until shutdown, dialling every new peer it
/// returns. A final `stopped` announce goes out on the way down.
pub async fn heartbeat(shared: Arc<Shared>, tracker: Arc<dyn Tracker>) {
    let connections = ConnectionManager::new(Arc::clone(&shared));
    let complete_at_start = shared.state().assembler.is_complete();
    let mut event = Some(Event::Started);
    let mut completion_sent = complete_at_start;

    loop {
        if !completion_sent && shared.state().assembler.is_complete() {
            event = Some(Event::Completed);
        }
        let announce = build_announce(&shared, event);
        let delay = match tracker.announce(&announce).await {
            Ok(response) => {
                info!(
                    "tracker returned {} peers, next announce in {:?}",
                    response.peers.len(),
                    response.interval
                );
                if event == Some(Event::Completed) {
                    completion_sent = true;
                }
                event = None;
                for peer in response.peers {
                    if is_self(&shared, &peer) || connections.get(&peer.addr).is_some() {
                        continue;
                    }
                    let connections = connections.clone();
                    tokio::spawn(async move {
                        if let Err(err) = connections.send_peer_message(peer.addr, Message::KeepAlive).await {
                            debug!("unable to reach {}: {}", peer.addr, err);
                        }
                    });
                }
                if response.interval.is_zero() {
                    shared.config.tracker_retry_interval
                } else {
                    response.interval
                }
            }
            Err(err) => {
                warn!("announce failed: {}", err);
                shared.config.tracker_retry_interval
            }
        };

        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = sleep(delay) => (),
        }
    }

    let stopped = build_announce(&shared, Some(Event::Stopped));
    match timeout(shared.config.connect_timeout, tracker.announce(&stopped)).await {
        Ok(Ok(_)) => debug!("announced stop"),
        Ok(Err(err)) => debug!("stop announce failed: {}", err),
        Err(_) => debug!("stop announce timed out"),
    }
}

fn build_announce(shared: &Shared, event: Option<Event>) -> Announce {
    let state = shared.state();
    let left = state
        .assembler
        .missing_pieces()
        .into_iter()
        .map(|index| shared.layout.piece_len(index))
        .sum();
    Announce {
        info_hash: shared.info.info_hash.clone(),
        peer_id: shared.config.client_id.clone(),
        port: shared.local_addr.port(),
        ip: advertised_ip(shared.local_addr),
        uploaded: state.uploaded,
        downloaded: state.downloaded,
        left,
        event,
    }
}

/// Trackers fall back to the request's source address when no ip is given.
fn advertised_ip(local: SocketAddr) -> Option<IpAddr> {
    let ip = local.ip();
    (!ip.is_unspecified()).then_some(ip)
}

/// Trackers list every peer in the swarm, this client included.
fn is_self(shared: &Shared, peer: &Peer) -> bool {
    if peer.peer_id.as_ref() == Some(&shared.config.client_id) {
        return true;
    }
    same_endpoint(shared.local_addr, peer.addr)
}

fn same_endpoint(local: SocketAddr, addr: SocketAddr) -> bool {
    if local.port() != addr.port() {
        return false;
    }
    let ip = addr.ip();
    ip.is_loopback() || ip.is_unspecified() || ip == local.ip()
}
