use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::debug;
use url::Url;

use crate::bencoding::Parser;

pub use self::request::{Announce, Event};
pub use self::response::{Peer, TrackerResponse};

mod request;
mod response;
pub mod server;

#[async_trait]
pub trait Tracker: Send + Sync {
    async fn announce(&self, request: &Announce) -> Result<TrackerResponse>;
}

/// Announces over HTTP GET and parses the bencoded reply as it streams in.
pub struct HttpTracker {
    announce: Url,
    client: reqwest::Client,
}

impl HttpTracker {
    pub fn new(announce: Url) -> Self {
        Self {
            announce,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tracker for HttpTracker {
    async fn announce(&self, request: &Announce) -> Result<TrackerResponse> {
        let url = request.url(&self.announce);
        debug!("announcing to {}", url);
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("server returned status {}", response.status()));
        }
        let value = {
            let mut parser = Parser::new();
            while let Some(chunk) = response.chunk().await? {
                parser.feed(&chunk)?;
            }
            parser.result()?
        };
        TrackerResponse::try_from(value)
    }
}

#[cfg(test)]
mod tests {
    use crate::bencoding::Value;
    use crate::core::{PeerId, Sha1};

    use super::*;

    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    fn announce() -> Announce {
        Announce {
            info_hash: Sha1([1; 20]),
            peer_id: PeerId([2; 20]),
            port: 6881,
            ip: None,
            uploaded: 0,
            downloaded: 0,
            left: 1234,
            event: Some(Event::Started),
        }
    }

    #[tokio::test]
    async fn announce_to_http_tracker() {
        let mock_tracker = MockServer::start().await;
        let body = Value::dictionary()
            .with_entry("interval", Value::Integer(900))
            .with_entry(
                "peers",
                Value::list().with_value(
                    Value::dictionary()
                        .with_entry("ip", Value::string("127.0.0.1"))
                        .with_entry("port", Value::Integer(6882)),
                ),
            );
        Mock::given(method("GET"))
            .and(path("/announce"))
            .and(query_param("port", "6881"))
            .and(query_param("left", "1234"))
            .and(query_param("event", "started"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.to_bytes(), "text/plain"),
            )
            .mount(&mock_tracker)
            .await;

        let announce_url = Url::parse(&format!("{}/announce", mock_tracker.uri())).unwrap();
        let tracker = HttpTracker::new(announce_url);
        let response = tracker
            .announce(&announce())
            .await
            .expect("failed to contact tracker");

        assert_eq!(response.interval.as_secs(), 900);
        assert_eq!(response.peers.len(), 1);
        assert_eq!(response.peers[0].addr, "127.0.0.1:6882".parse().unwrap());
    }

    #[tokio::test]
    async fn tracker_error_status() {
        let mock_tracker = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_tracker)
            .await;

        let announce_url = Url::parse(&format!("{}/announce", mock_tracker.uri())).unwrap();
        let tracker = HttpTracker::new(announce_url);

        assert!(tracker.announce(&announce()).await.is_err());
    }
}
