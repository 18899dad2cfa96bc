use std::path::Path;

use anyhow::{Error, Result, anyhow};
use size::Size;
use tokio::fs;

use crate::bencoding::Value;
use crate::core::Sha1;
use crate::storage::Layout;

/// The `info` dictionary of a single-file torrent.
#[derive(Debug, PartialEq, Clone)]
pub struct Info {
    pub info_hash: Sha1,
    pub piece_size: usize,
    pub pieces: Vec<Sha1>,
    pub name: String,
    pub length: usize,
}

impl Info {
    /// Describes `data`, hashing it one piece at a time.
    pub fn new(name: impl Into<String>, piece_size: usize, data: &[u8]) -> Self {
        let pieces = data.chunks(piece_size).map(Sha1::digest).collect();
        let mut info = Self {
            info_hash: Sha1([0; Sha1::LEN]),
            piece_size,
            pieces,
            name: name.into(),
            length: data.len(),
        };
        info.info_hash = Sha1::digest(&info.to_value().to_bytes());
        info
    }

    pub async fn from_file(path: impl AsRef<Path>, piece_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("invalid file name {}", path.display()))?;
        if piece_size == 0 {
            return Err(anyhow!("piece size must be positive"));
        }
        let data = fs::read(path).await?;
        Ok(Self::new(name, piece_size, &data))
    }

    fn build_pieces(pieces: &[u8]) -> Result<Vec<Sha1>> {
        if pieces.len() % Sha1::LEN != 0 {
            return Err(anyhow!(
                "invalid length {}. must be a multiple of {}",
                pieces.len(),
                Sha1::LEN
            ));
        }
        Ok(pieces
            .chunks(Sha1::LEN)
            .filter_map(Sha1::from_slice)
            .collect())
    }

    pub fn total_pieces(&self) -> usize {
        self.pieces.len()
    }

    pub fn layout(&self, block_size: Size) -> Layout {
        Layout::new(self.piece_size, self.length, block_size)
    }

    pub fn to_value(&self) -> Value {
        let pieces = self
            .pieces
            .iter()
            .flat_map(|sha1| sha1.0)
            .collect::<Vec<u8>>();
        Value::dictionary()
            .with_entry("name", Value::string(&self.name))
            .with_entry("piece length", Value::from(self.piece_size))
            .with_entry("pieces", Value::String(pieces))
            .with_entry("length", Value::from(self.length))
    }
}

impl TryFrom<Value> for Info {
    type Error = Error;

    fn try_from(mut value: Value) -> Result<Self> {
        let info_hash = Sha1::digest(&value.to_bytes());
        if value.try_remove_entry("files")?.is_some() {
            return Err(anyhow!("multi-file torrents are not supported"));
        }
        let name = value.remove_entry("name")?.try_into()?;
        let piece_size: usize = value.remove_entry("piece length")?.try_into()?;
        let length: usize = value.remove_entry("length")?.try_into()?;
        let pieces: Vec<u8> = value.remove_entry("pieces")?.try_into()?;
        let pieces = Info::build_pieces(&pieces)?;

        if piece_size == 0 {
            return Err(anyhow!("piece length must be positive"));
        }
        let expected = length.div_ceil(piece_size);
        if pieces.len() != expected {
            return Err(anyhow!(
                "{} piece hashes for {} pieces",
                pieces.len(),
                expected
            ));
        }

        Ok(Info {
            info_hash,
            piece_size,
            pieces,
            name,
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_data() {
        let data = vec![7; 100];
        let info = Info::new("data.bin", 32, &data);

        assert_eq!(info.total_pieces(), 4);
        assert_eq!(info.pieces[3], Sha1::digest(&[7; 4]));
        assert_eq!(info.info_hash, Sha1::digest(&info.to_value().to_bytes()));
        assert_eq!(info.layout(Size::from_bytes(16)).num_blocks(3), 1);
    }

    #[test]
    fn info_hash_covers_whole_dictionary() {
        let info = Info::new("data.bin", 32, &[1; 40]);
        let value = info.to_value().with_entry("private", Value::Integer(1));
        let parsed = Info::try_from(value).unwrap();

        assert_ne!(parsed.info_hash, info.info_hash);
        assert_eq!(parsed.pieces, info.pieces);
    }

    #[test]
    fn reject_multi_file() {
        let value = Info::new("dir", 32, &[1; 40])
            .to_value()
            .with_entry("files", Value::list());

        assert!(Info::try_from(value).is_err());
    }

    #[test]
    fn reject_missing_hashes() {
        let mut info = Info::new("data.bin", 32, &[1; 40]);
        info.pieces.pop();

        assert!(Info::try_from(info.to_value()).is_err());
    }
}
