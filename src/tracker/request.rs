use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;

use anyhow::{Error, Result, anyhow};
use url::Url;
use url::form_urlencoded::byte_serialize;

use crate::core::{PeerId, Sha1};

#[derive(Debug, Clone)]
pub struct Announce {
    pub info_hash: Sha1,
    pub peer_id: PeerId,
    /// The port number that the client is listening on.
    pub port: u16,
    /// Address peers should dial, when the client listens on a specific one.
    pub ip: Option<IpAddr>,
    /// Bytes sent to peers since the client started.
    pub uploaded: usize,
    /// Bytes of verified pieces received since the client started.
    pub downloaded: usize,
    /// Bytes still missing before the download is complete.
    pub left: usize,
    pub event: Option<Event>,
}

impl Announce {
    /// Appends the announce parameters to `announce`, keeping any query it
    /// already carries.
    pub fn url(&self, announce: &Url) -> Url {
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}",
            url_encode(&self.info_hash.0),
            url_encode(&self.peer_id.0),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
        );
        if let Some(ip) = &self.ip {
            query.push_str(&format!("&ip={}", ip));
        }
        if let Some(event) = &self.event {
            query.push_str("&event=");
            query.push_str(event.into());
        }
        let mut url = announce.clone();
        let query = match announce.query() {
            Some(existing) if !existing.is_empty() => format!("{}&{}", existing, query),
            _ => query,
        };
        url.set_query(Some(&query));
        url
    }

    /// Reads back the parameters of an announce from the query string a
    /// tracker receives. `ip` and `event` are optional, the rest required.
    pub fn from_query(query: &str) -> Result<Self> {
        let params: HashMap<&str, Vec<u8>> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (key, url_decode(value))
            })
            .collect();

        let info_hash = required(&params, "info_hash")?;
        let info_hash = <[u8; 20]>::try_from(info_hash)
            .map_err(|_| anyhow!("info_hash must be 20 bytes, got {}", info_hash.len()))?;
        let peer_id = required(&params, "peer_id")?;
        let peer_id = <[u8; 20]>::try_from(peer_id)
            .map_err(|_| anyhow!("peer_id must be 20 bytes, got {}", peer_id.len()))?;
        let port: u16 = number(&params, "port")?;
        if port == 0 {
            return Err(anyhow!("invalid port 0"));
        }
        let ip = match params.get("ip") {
            Some(ip) if !ip.is_empty() => Some(std::str::from_utf8(ip)?.parse::<IpAddr>()?),
            _ => None,
        };
        let event = match params.get("event") {
            Some(event) if !event.is_empty() => Some(std::str::from_utf8(event)?.parse::<Event>()?),
            _ => None,
        };

        Ok(Self {
            info_hash: Sha1(info_hash),
            peer_id: PeerId(peer_id),
            port,
            ip,
            uploaded: number(&params, "uploaded")?,
            downloaded: number(&params, "downloaded")?,
            left: number(&params, "left")?,
            event,
        })
    }
}

fn required<'a>(params: &'a HashMap<&str, Vec<u8>>, key: &str) -> Result<&'a [u8]> {
    params
        .get(key)
        .map(Vec::as_slice)
        .ok_or_else(|| anyhow!("missing parameter {}", key))
}

fn number<T>(params: &HashMap<&str, Vec<u8>>, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text = std::str::from_utf8(required(params, key)?)?;
    text.parse()
        .map_err(|err| anyhow!("bad parameter {}={:?}: {}", key, text, err))
}

fn url_encode(bytes: &[u8]) -> String {
    String::from_iter(byte_serialize(bytes))
}

/// Form encoding writes spaces as `+`; a literal `+` arrives as `%2B`.
fn url_decode(value: &str) -> Vec<u8> {
    let value = value.replace('+', " ");
    urlencoding::decode_binary(value.as_bytes()).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The first request to the tracker must include the event key with this value.
    Started,
    /// Sent when the client is shutting down gracefully.
    Stopped,
    /// Sent when the download completes, but not if it was already complete at startup.
    Completed,
}

impl FromStr for Event {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "started" => Ok(Event::Started),
            "stopped" => Ok(Event::Stopped),
            "completed" => Ok(Event::Completed),
            other => Err(anyhow!("invalid event {:?}", other)),
        }
    }
}

impl From<&Event> for &str {
    fn from(value: &Event) -> Self {
        match value {
            Event::Started => "started",
            Event::Stopped => "stopped",
            Event::Completed => "completed",
        }
    }
}
