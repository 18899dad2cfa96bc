use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::core::Sha1;
use crate::storage::Layout;

/// An ordered run of blocks. Empty blocks mark slots that have not arrived.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Piece {
    pub blocks: Vec<Vec<u8>>,
}

impl Piece {
    pub fn empty(num_blocks: usize) -> Self {
        Self {
            blocks: vec![Vec::new(); num_blocks],
        }
    }

    pub fn hash(&self) -> Sha1 {
        Sha1::digest_all(self.blocks.iter().map(Vec::as_slice))
    }

    pub fn len(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.blocks.concat()
    }
}

pub fn split_bytes(data: &[u8], layout: &Layout) -> Vec<Piece> {
    (0..layout.total_pieces())
        .map(|piece| Piece {
            blocks: layout
                .blocks(piece)
                .map(|block| {
                    let start = layout.piece_offset(piece) + block.begin;
                    data[start..start + block.length].to_vec()
                })
                .collect(),
        })
        .collect()
}

/// Reads the file at `path` and splits it along `layout`. The file must be
/// exactly `layout.total_size` bytes long.
pub async fn split_into_pieces(path: impl AsRef<Path>, layout: &Layout) -> anyhow::Result<Vec<Piece>> {
    let data = fs::read(path.as_ref()).await?;
    if data.len() != layout.total_size {
        anyhow::bail!(
            "{} is {} bytes, expected {}",
            path.as_ref().display(),
            data.len(),
            layout.total_size
        );
    }
    Ok(split_bytes(&data, layout))
}

/// Writes the concatenation of `pieces` to `path`, cut to `total_len` bytes.
pub async fn combine_pieces(
    path: impl AsRef<Path>,
    pieces: &[Piece],
    total_len: usize,
) -> anyhow::Result<()> {
    let mut file = fs::File::create(path).await?;
    let mut remaining = total_len;
    for block in pieces.iter().flat_map(|piece| piece.blocks.iter()) {
        let len = block.len().min(remaining);
        file.write_all(&block[..len]).await?;
        remaining -= len;
    }
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use size::Size;

    use super::*;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn split_uneven_file() {
        let layout = Layout::new(8, 20, Size::from_bytes(3));
        let data = data(20);
        let pieces = split_bytes(&data, &layout);

        assert_eq!(pieces.len(), 3);
        assert_eq!(
            pieces[0].blocks,
            vec![data[0..3].to_vec(), data[3..6].to_vec(), data[6..8].to_vec()]
        );
        assert_eq!(pieces[2].blocks, vec![data[16..19].to_vec(), data[19..20].to_vec()]);
        assert_eq!(layout.num_blocks(2), 2);
        assert_eq!(pieces[1].hash(), Sha1::digest(&data[8..16]));
    }

    #[tokio::test]
    async fn split_then_combine_reproduces_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        let output = dir.path().join("output");
        let data = data(10_000);
        fs::write(&source, &data).await.unwrap();

        let layout = Layout::new(4096, data.len(), Size::from_bytes(1024));
        let pieces = split_into_pieces(&source, &layout).await.unwrap();
        combine_pieces(&output, &pieces, data.len()).await.unwrap();

        assert_eq!(fs::read(&output).await.unwrap(), data);
    }

    #[tokio::test]
    async fn split_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        fs::write(&source, data(10)).await.unwrap();

        let layout = Layout::new(4, 12, Size::from_bytes(2));
        assert!(split_into_pieces(&source, &layout).await.is_err());
    }
}
