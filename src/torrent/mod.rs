mod info;

use std::path::Path;

use anyhow::{Error, Result};
use tokio::fs::{self, File};
use url::Url;

use crate::bencoding::Value;
use crate::codec::AsyncDecoder;

pub use info::Info;

// https://wiki.theory.org/BitTorrentSpecification#Metainfo_File_Structure

#[derive(Debug, PartialEq, Clone)]
pub struct Torrent {
    pub announce: Url,
    pub info: Info,
}

impl Torrent {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path).await?;
        let value = Value::decode(&mut file).await?;
        Torrent::try_from(value)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_value().to_bytes()).await?;
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        Value::dictionary()
            .with_entry("announce", Value::string(self.announce.as_str()))
            .with_entry("info", self.info.to_value())
    }
}

impl TryFrom<Value> for Torrent {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let announce: String = value.remove_entry("announce")?.try_into()?;
        let announce = Url::parse(&announce)?;
        let info = value.remove_entry("info")?.try_into()?;
        Ok(Torrent { announce, info })
    }
}

#[cfg(test)]
mod tests {
    use crate::core::Sha1;

    use super::*;

    #[test]
    fn valid_torrent_metainfo() {
        let piece1 = [1; 20];
        let piece2 = [2; 20];
        let mut pieces = Vec::with_capacity(40);
        pieces.extend_from_slice(&piece1);
        pieces.extend_from_slice(&piece2);

        let metainfo = Value::dictionary()
            .with_entry(
                "announce",
                Value::string("http://tracker.example.com:8080/announce"),
            )
            .with_entry(
                "info",
                Value::dictionary()
                    .with_entry("piece length", Value::Integer(1234))
                    .with_entry("pieces", Value::String(pieces))
                    .with_entry("name", Value::string("image.iso"))
                    .with_entry("length", Value::Integer(2000)),
            );

        let torrent = Torrent::try_from(metainfo).expect("invalid metainfo");

        assert_eq!(
            torrent.announce.as_str(),
            "http://tracker.example.com:8080/announce"
        );
        assert_eq!(torrent.info.piece_size, 1234);
        assert_eq!(torrent.info.pieces, vec![Sha1(piece1), Sha1(piece2)]);
        assert_eq!(torrent.info.name, "image.iso");
        assert_eq!(torrent.info.length, 2000);
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.torrent");
        let torrent = Torrent {
            announce: Url::parse("http://localhost:6969/announce").unwrap(),
            info: Info::new("data.bin", 16, b"some bytes to describe in pieces"),
        };

        torrent.save(&path).await.unwrap();
        let loaded = Torrent::load(&path).await.unwrap();

        assert_eq!(loaded, torrent);
    }
}
