use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::fs;
use tokio_util::bytes::BytesMut;

use crate::bencoding::{Encoder, Value};
use crate::message::{pack_bits, unpack_bits};
use crate::storage::Piece;

/// Durable home for the resumable download state. The bytes are opaque to
/// the persister; see [`SavedState`] for the format.
#[async_trait]
pub trait Persister: Send + Sync {
    async fn save_state(&self, state: Vec<u8>) -> Result<()>;

    /// Returns an empty buffer when nothing was saved yet.
    async fn read_state(&self) -> Result<Vec<u8>>;
}

pub struct FilePersister {
    path: PathBuf,
}

impl FilePersister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Persister for FilePersister {
    async fn save_state(&self, state: Vec<u8>) -> Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, state).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn read_state(&self) -> Result<Vec<u8>> {
        match fs::read(&self.path).await {
            Ok(state) => Ok(state),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Default)]
pub struct MemoryPersister {
    state: Mutex<Vec<u8>>,
}

impl MemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Persister for MemoryPersister {
    async fn save_state(&self, state: Vec<u8>) -> Result<()> {
        *self.state.lock().map_err(|_| anyhow!("persister lock poisoned"))? = state;
        Ok(())
    }

    async fn read_state(&self) -> Result<Vec<u8>> {
        let state = self.state.lock().map_err(|_| anyhow!("persister lock poisoned"))?;
        Ok(state.clone())
    }
}

/// Snapshot of owned pieces: `d6:bitmap<packed bits>6:piecesl<piece>...ee`
/// where each piece is a list of its block strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedState {
    pub bitmap: Vec<bool>,
    pub pieces: Vec<Piece>,
}

impl SavedState {
    pub fn encode(&self) -> Vec<u8> {
        let data: usize = self.pieces.iter().map(Piece::len).sum();
        let mut dst = BytesMut::with_capacity(data + 64);
        let mut encoder = Encoder::new(&mut dst);
        encoder
            .dictionary()
            .string(b"bitmap")
            .string(&pack_bits(&self.bitmap))
            .string(b"pieces")
            .list();
        for piece in &self.pieces {
            encoder.list();
            for block in &piece.blocks {
                encoder.string(block);
            }
            encoder.end();
        }
        encoder.end().end();
        dst.to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut value = Value::decode_bytes(bytes)?;
        let packed: Vec<u8> = value.remove_entry("bitmap")?.try_into()?;
        let entries: Vec<Value> = value.remove_entry("pieces")?.try_into()?;

        let mut pieces = Vec::with_capacity(entries.len());
        for entry in entries {
            let blocks: Vec<Value> = entry.try_into()?;
            let blocks = blocks
                .into_iter()
                .map(Vec::<u8>::try_from)
                .collect::<Result<Vec<_>>>()?;
            pieces.push(Piece { blocks });
        }

        let mut bitmap = unpack_bits(&packed);
        if bitmap.len() < pieces.len() {
            return Err(anyhow!(
                "bitmap covers {} pieces, state has {}",
                bitmap.len(),
                pieces.len()
            ));
        }
        bitmap.truncate(pieces.len());
        Ok(Self { bitmap, pieces })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SavedState {
        SavedState {
            bitmap: vec![true, false, true],
            pieces: vec![
                Piece {
                    blocks: vec![vec![1, 2], vec![3]],
                },
                Piece::empty(2),
                Piece {
                    blocks: vec![vec![4, 5]],
                },
            ],
        }
    }

    #[test]
    fn saved_state_survives_encoding() {
        let state = state();
        assert_eq!(SavedState::decode(&state.encode()).unwrap(), state);
    }

    #[test]
    fn saved_state_layout() {
        let state = SavedState {
            bitmap: vec![true, false],
            pieces: vec![Piece { blocks: vec![vec![b'a'], vec![b'b']] }, Piece::empty(1)],
        };

        assert_eq!(state.encode(), b"d6:bitmap1:\x806:piecesll1:a1:bel0:eee");
    }

    #[test]
    fn reject_short_bitmap() {
        let bytes = Value::dictionary()
            .with_entry("bitmap", Value::String(Vec::new()))
            .with_entry("pieces", Value::list().with_value(Value::list()))
            .to_bytes();
        assert!(SavedState::decode(&bytes).is_err());
    }

    #[tokio::test]
    async fn memory_persister() {
        let persister = MemoryPersister::new();
        assert!(persister.read_state().await.unwrap().is_empty());

        persister.save_state(state().encode()).await.unwrap();
        let bytes = persister.read_state().await.unwrap();
        assert_eq!(SavedState::decode(&bytes).unwrap(), state());
    }

    #[tokio::test]
    async fn file_persister() {
        let dir = tempfile::tempdir().unwrap();
        let persister = FilePersister::new(dir.path().join("state"));
        assert!(persister.read_state().await.unwrap().is_empty());

        persister.save_state(vec![1, 2, 3]).await.unwrap();
        persister.save_state(state().encode()).await.unwrap();

        let reopened = FilePersister::new(dir.path().join("state"));
        let bytes = reopened.read_state().await.unwrap();
        assert_eq!(SavedState::decode(&bytes).unwrap(), state());
    }
}
