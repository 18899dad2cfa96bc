use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Error, Result, anyhow};

use crate::bencoding::value::Value;
use crate::core::PeerId;

const COMPACT_PEER_LEN: usize = 6;

#[derive(Debug, PartialEq)]
pub struct TrackerResponse {
    pub complete: Option<usize>,
    pub incomplete: Option<usize>,
    pub interval: Duration,
    pub peers: Vec<Peer>,
}

impl TryFrom<Value> for TrackerResponse {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        if let Some(reason) = value.try_remove_entry("failure reason")? {
            let reason: String = reason.try_into()?;
            return Err(anyhow!("tracker failure: {}", reason));
        }
        let complete = optional_count(&mut value, "complete")?;
        let incomplete = optional_count(&mut value, "incomplete")?;
        let interval: u64 = usize::try_from(value.remove_entry("interval")?)? as u64;
        let peers = match value.remove_entry("peers")? {
            Value::String(compact) => parse_compact(&compact)?,
            peers => {
                let peers: Vec<Value> = peers.try_into()?;
                let mut result = Vec::with_capacity(peers.len());
                for peer in peers {
                    let peer = Peer::try_from(peer)?;
                    result.push(peer);
                }
                result
            }
        };
        Ok(TrackerResponse {
            complete,
            incomplete,
            interval: Duration::from_secs(interval),
            peers,
        })
    }
}

impl TrackerResponse {
    /// The bencoded body a tracker sends back. Peers use the dictionary form
    /// so their ids and IPv6 addresses survive.
    pub fn to_value(&self) -> Value {
        let mut value = Value::dictionary()
            .with_entry("interval", Value::from(self.interval.as_secs() as usize))
            .with_entry("peers", Value::List(self.peers.iter().map(Peer::to_value).collect()));
        if let Some(complete) = self.complete {
            value = value.with_entry("complete", Value::from(complete));
        }
        if let Some(incomplete) = self.incomplete {
            value = value.with_entry("incomplete", Value::from(incomplete));
        }
        value
    }
}

fn optional_count(value: &mut Value, key: &str) -> Result<Option<usize>> {
    value
        .try_remove_entry(key)?
        .map(usize::try_from)
        .transpose()
}

/// 6 bytes per peer: IPv4 address then port, both in network byte order.
fn parse_compact(bytes: &[u8]) -> Result<Vec<Peer>> {
    if bytes.len() % COMPACT_PEER_LEN != 0 {
        return Err(anyhow!(
            "compact peers length {} is not a multiple of {}",
            bytes.len(),
            COMPACT_PEER_LEN
        ));
    }
    Ok(bytes
        .chunks(COMPACT_PEER_LEN)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            Peer {
                peer_id: None,
                addr: SocketAddr::new(IpAddr::V4(ip), port),
            }
        })
        .collect())
}

#[derive(Debug, PartialEq, Clone)]
pub struct Peer {
    pub peer_id: Option<PeerId>,
    pub addr: SocketAddr,
}

impl Peer {
    fn to_value(&self) -> Value {
        let mut value = Value::dictionary()
            .with_entry("ip", Value::string(&self.addr.ip().to_string()))
            .with_entry("port", Value::from(self.addr.port() as usize));
        if let Some(peer_id) = &self.peer_id {
            value = value.with_entry("peer id", Value::String(peer_id.0.to_vec()));
        }
        value
    }
}

impl TryFrom<Value> for Peer {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let peer_id = match value.try_remove_entry("peer id")? {
            Some(peer_id) => {
                let bytes: Vec<u8> = peer_id.try_into()?;
                let bytes: [u8; 20] = bytes
                    .try_into()
                    .map_err(|_| anyhow!("peer id must be 20 bytes"))?;
                Some(PeerId(bytes))
            }
            None => None,
        };
        let port: u16 = value.remove_entry("port")?.try_into()?;
        let ip: String = value.remove_entry("ip")?.try_into()?;
        let ip: IpAddr = ip.parse()?;
        Ok(Peer {
            peer_id,
            addr: SocketAddr::new(ip, port),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_tracker_response() {
        let peer_id = "-TR3000-47qm0ov7eav4";
        let body = Value::dictionary()
            .with_entry("complete", Value::Integer(12))
            .with_entry("incomplete", Value::Integer(34))
            .with_entry("interval", Value::Integer(1800))
            .with_entry(
                "peers",
                Value::list().with_value(
                    Value::dictionary()
                        .with_entry("ip", Value::string("12.34.56.78"))
                        .with_entry("peer id", Value::string(peer_id))
                        .with_entry("port", Value::Integer(51413)),
                ),
            );

        let response = TrackerResponse::try_from(body).expect("invalid response body");

        assert_eq!(
            response,
            TrackerResponse {
                complete: Some(12),
                incomplete: Some(34),
                interval: Duration::from_secs(1800),
                peers: vec![Peer {
                    peer_id: Some(PeerId(*b"-TR3000-47qm0ov7eav4")),
                    addr: "12.34.56.78:51413".parse().unwrap(),
                }]
            }
        );
    }

    #[test]
    fn support_peer_ip_v6() {
        let body = Value::dictionary()
            .with_entry("interval", Value::Integer(1800))
            .with_entry(
                "peers",
                Value::list().with_value(
                    Value::dictionary()
                        .with_entry("ip", Value::string("2600:1702:6aa3:b210::72"))
                        .with_entry("port", Value::Integer(51413)),
                ),
            );

        let response = TrackerResponse::try_from(body).expect("invalid response body");

        assert_eq!(
            response.peers[0].addr.ip(),
            IpAddr::V6("2600:1702:6aa3:b210::72".parse().unwrap())
        );
        assert_eq!(response.complete, None);
    }

    #[test]
    fn compact_peers() {
        let body = Value::dictionary()
            .with_entry("interval", Value::Integer(60))
            .with_entry(
                "peers",
                Value::String(vec![127, 0, 0, 1, 0x1a, 0xe1, 10, 0, 0, 2, 0x1a, 0xe2]),
            );

        let response = TrackerResponse::try_from(body).expect("invalid response body");

        let addrs: Vec<_> = response.peers.iter().map(|peer| peer.addr).collect();
        assert_eq!(
            addrs,
            vec![
                "127.0.0.1:6881".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:6882".parse().unwrap()
            ]
        );
    }

    #[test]
    fn failure_reason() {
        let body = Value::dictionary().with_entry("failure reason", Value::string("unregistered"));

        let err = TrackerResponse::try_from(body).unwrap_err();
        assert!(err.to_string().contains("unregistered"));
    }

    #[test]
    fn encode_for_clients() {
        let response = TrackerResponse {
            complete: Some(1),
            incomplete: Some(0),
            interval: Duration::from_secs(5),
            peers: vec![
                Peer {
                    peer_id: Some(PeerId([7; 20])),
                    addr: "10.0.0.1:6881".parse().unwrap(),
                },
                Peer {
                    peer_id: None,
                    addr: "[::1]:6882".parse().unwrap(),
                },
            ],
        };
        let value = response.to_value();

        assert_eq!(value.get_entry("interval"), Some(&Value::Integer(5)));
        assert_eq!(TrackerResponse::try_from(value).unwrap(), response);
    }
}
