use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::bencoding::Value;
use crate::core::{PeerId, Sha1};
use crate::tracker::{Announce, Event, Peer, TrackerResponse};
use crate::transport;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Request line and headers together may not exceed this.
const MAX_REQUEST_HEAD: u64 = 8 * 1024;

struct Member {
    addr: SocketAddr,
    left: usize,
}

/// Swarm membership for the torrents this tracker serves. Announces for any
/// other info hash are refused.
pub struct Registry {
    interval: Duration,
    swarms: Mutex<HashMap<Sha1, HashMap<PeerId, Member>>>,
}

impl Registry {
    pub fn new(interval: Duration, info_hashes: impl IntoIterator<Item = Sha1>) -> Self {
        let swarms = info_hashes
            .into_iter()
            .map(|info_hash| (info_hash, HashMap::new()))
            .collect();
        Self {
            interval,
            swarms: Mutex::new(swarms),
        }
    }

    fn swarms(&self) -> MutexGuard<'_, HashMap<Sha1, HashMap<PeerId, Member>>> {
        self.swarms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records an announce arriving from `source` and returns every other
    /// member of the swarm. A `stopped` announce removes the announcer.
    pub fn announce(&self, announce: &Announce, source: IpAddr) -> Result<TrackerResponse> {
        let mut swarms = self.swarms();
        let swarm = swarms
            .get_mut(&announce.info_hash)
            .ok_or_else(|| anyhow!("invalid info hash {}", announce.info_hash))?;

        if announce.event == Some(Event::Stopped) {
            swarm.remove(&announce.peer_id);
        } else {
            let ip = announce.ip.unwrap_or(source);
            let member = Member {
                addr: SocketAddr::new(ip, announce.port),
                left: announce.left,
            };
            swarm.insert(announce.peer_id.clone(), member);
        }

        let complete = swarm.values().filter(|member| member.left == 0).count();
        let peers = swarm
            .iter()
            .filter(|(peer_id, _)| **peer_id != announce.peer_id)
            .map(|(peer_id, member)| Peer {
                peer_id: Some(peer_id.clone()),
                addr: member.addr,
            })
            .collect();
        Ok(TrackerResponse {
            complete: Some(complete),
            incomplete: Some(swarm.len() - complete),
            interval: self.interval,
            peers,
        })
    }
}

/// Answers announces over HTTP until `token` is cancelled.
pub async fn serve(listener: TcpListener, registry: Arc<Registry>, token: CancellationToken) {
    transport::serve(listener, token, move |socket, addr| {
        let registry = Arc::clone(&registry);
        async move {
            if let Err(err) = handle_connection(socket, addr, &registry).await {
                warn!("[{}] tracker request failed: {}", addr, err);
            }
        }
    })
    .await;
    info!("tracker stopped");
}

async fn handle_connection(socket: TcpStream, addr: SocketAddr, registry: &Registry) -> Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_HEAD));
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    loop {
        let mut header = String::new();
        let read = reader.read_line(&mut header).await?;
        if read == 0 || header.trim_end().is_empty() {
            break;
        }
    }

    let (status, body) = route(registry, request_line.trim_end(), addr.ip());
    debug!("[{}] {} -> {}", addr, request_line.trim_end(), status);
    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.shutdown().await?;
    Ok(())
}

/// Maps a request line to a status line and a body. Bad announces still get
/// `200 OK`, with a bencoded `failure reason` clients can show.
fn route(registry: &Registry, request_line: &str, source: IpAddr) -> (&'static str, Vec<u8>) {
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return ("400 Bad Request", b"bad request".to_vec());
    };
    if method != "GET" {
        return ("405 Method Not Allowed", b"method not allowed".to_vec());
    }
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if path != "/" && path != "/announce" {
        return ("404 Not Found", b"not found".to_vec());
    }

    let response = Announce::from_query(query).and_then(|announce| {
        let response = registry.announce(&announce, source)?;
        info!(
            "{} announced {:?} for {}, {} other peers",
            SocketAddr::new(announce.ip.unwrap_or(source), announce.port),
            announce.event,
            announce.info_hash,
            response.peers.len()
        );
        Ok(response)
    });
    let body = match response {
        Ok(response) => response.to_value(),
        Err(err) => {
            debug!("rejected announce from {}: {}", source, err);
            Value::dictionary().with_entry("failure reason", Value::string(&err.to_string()))
        }
    };
    ("200 OK", body.to_bytes())
}

#[cfg(test)]
mod tests {
    use url::Url;

    use crate::tracker::{HttpTracker, Tracker};

    use super::*;

    fn announce(peer_id: u8, port: u16) -> Announce {
        Announce {
            info_hash: Sha1([1; 20]),
            peer_id: PeerId([peer_id; 20]),
            port,
            ip: None,
            uploaded: 0,
            downloaded: 0,
            left: 100,
            event: Some(Event::Started),
        }
    }

    fn registry() -> Registry {
        Registry::new(DEFAULT_INTERVAL, [Sha1([1; 20])])
    }

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn announcers_see_each_other() {
        let registry = registry();

        let first = registry.announce(&announce(1, 6881), localhost()).unwrap();
        assert!(first.peers.is_empty());

        let second = registry.announce(&announce(2, 6882), localhost()).unwrap();
        assert_eq!(
            second.peers,
            vec![Peer {
                peer_id: Some(PeerId([1; 20])),
                addr: "127.0.0.1:6881".parse().unwrap(),
            }]
        );
        assert_eq!(second.interval, DEFAULT_INTERVAL);
        assert_eq!((second.complete, second.incomplete), (Some(0), Some(2)));
    }

    #[test]
    fn stopped_leaves_the_swarm() {
        let registry = registry();
        registry.announce(&announce(1, 6881), localhost()).unwrap();
        let stopped = Announce {
            event: Some(Event::Stopped),
            ..announce(1, 6881)
        };
        registry.announce(&stopped, localhost()).unwrap();

        let other = registry.announce(&announce(2, 6882), localhost()).unwrap();
        assert!(other.peers.is_empty());
    }

    #[test]
    fn advertised_ip_wins_over_source() {
        let registry = registry();
        let announced = Announce {
            ip: Some("10.0.0.7".parse().unwrap()),
            left: 0,
            ..announce(1, 6881)
        };
        registry.announce(&announced, localhost()).unwrap();

        let other = registry.announce(&announce(2, 6882), localhost()).unwrap();
        assert_eq!(other.peers[0].addr, "10.0.0.7:6881".parse().unwrap());
        assert_eq!(other.complete, Some(1));
    }

    #[test]
    fn unknown_torrent_is_refused() {
        let foreign = Announce {
            info_hash: Sha1([9; 20]),
            ..announce(1, 6881)
        };

        assert!(registry().announce(&foreign, localhost()).is_err());
    }

    #[test]
    fn route_requests() {
        let registry = registry();

        assert_eq!(route(&registry, "POST / HTTP/1.1", localhost()).0, "405 Method Not Allowed");
        assert_eq!(route(&registry, "GET /scrape HTTP/1.1", localhost()).0, "404 Not Found");
        assert_eq!(route(&registry, "", localhost()).0, "400 Bad Request");

        let (status, body) = route(&registry, "GET /announce?port=1 HTTP/1.1", localhost());
        assert_eq!(status, "200 OK");
        let body = Value::decode_bytes(&body).unwrap();
        assert!(body.get_entry("failure reason").is_some());
    }

    #[tokio::test]
    async fn http_tracker_against_server() {
        let listener = transport::listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        tokio::spawn(serve(listener, Arc::new(registry()), token.clone()));

        let url = Url::parse(&format!("http://{}/announce", addr)).unwrap();
        let tracker = HttpTracker::new(url);

        let first = tracker.announce(&announce(1, 6881)).await.unwrap();
        assert!(first.peers.is_empty());
        let second = tracker.announce(&announce(2, 6882)).await.unwrap();
        assert_eq!(second.peers.len(), 1);
        assert_eq!(second.peers[0].peer_id, Some(PeerId([1; 20])));
        assert_eq!(second.peers[0].addr, "127.0.0.1:6881".parse().unwrap());
        assert_eq!(second.interval, DEFAULT_INTERVAL);

        let foreign = Announce {
            info_hash: Sha1([9; 20]),
            ..announce(3, 6883)
        };
        let err = tracker.announce(&foreign).await.unwrap_err();
        assert!(err.to_string().contains("invalid info hash"));

        token.cancel();
    }
}
