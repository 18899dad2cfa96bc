use std::collections::HashMap;

use anyhow::{Result, anyhow};
use log::warn;

use crate::core::Sha1;
use crate::message::{Block, BlockData};
use crate::storage::{Layout, Piece, SavedState};

/// Outcome of adding a block.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Status {
    /// Misaligned, wrong length, unknown piece or a piece we already own.
    Ignored,
    Incomplete,
    /// Every slot was filled but the piece did not match its hash. The
    /// piece starts over from scratch.
    Invalid,
    Complete,
}

/// Collects blocks into pieces and decides when a piece is owned.
///
/// `bitmap[i]` flips to true exactly once, after piece `i` hashes to the
/// expected digest. Per-block progress only exists for pieces in flight.
pub struct Assembler {
    layout: Layout,
    hashes: Vec<Sha1>,
    pieces: Vec<Piece>,
    bitmap: Vec<bool>,
    blocks: HashMap<usize, Vec<bool>>,
}

impl Assembler {
    pub fn new(layout: Layout, hashes: Vec<Sha1>) -> Self {
        let pieces = (0..hashes.len())
            .map(|piece| Piece::empty(layout.num_blocks(piece)))
            .collect();
        let bitmap = vec![false; hashes.len()];
        Self {
            layout,
            hashes,
            pieces,
            bitmap,
            blocks: HashMap::new(),
        }
    }

    /// Takes ownership of a complete copy of the data.
    pub fn seed(&mut self, pieces: Vec<Piece>) -> Result<()> {
        if pieces.len() != self.hashes.len() {
            return Err(anyhow!(
                "expected {} pieces, got {}",
                self.hashes.len(),
                pieces.len()
            ));
        }
        if let Some(index) = (0..pieces.len()).find(|i| pieces[*i].hash() != self.hashes[*i]) {
            return Err(anyhow!("piece {} does not match its hash", index));
        }
        self.pieces = pieces;
        self.bitmap = vec![true; self.hashes.len()];
        self.blocks.clear();
        Ok(())
    }

    /// Re-adopts pieces from a saved state, hashing each one again. Returns
    /// how many pieces were restored.
    pub fn restore(&mut self, saved: SavedState) -> Result<usize> {
        if saved.pieces.len() != self.hashes.len() {
            return Err(anyhow!(
                "saved state has {} pieces, torrent has {}",
                saved.pieces.len(),
                self.hashes.len()
            ));
        }
        let mut restored = 0;
        for (index, (piece, owned)) in saved.pieces.into_iter().zip(saved.bitmap).enumerate() {
            if !owned {
                continue;
            }
            if self.is_well_formed(index, &piece) && piece.hash() == self.hashes[index] {
                self.pieces[index] = piece;
                self.bitmap[index] = true;
                restored += 1;
            } else {
                warn!("discarding saved piece {}: hash mismatch", index);
            }
        }
        Ok(restored)
    }

    fn is_well_formed(&self, index: usize, piece: &Piece) -> bool {
        piece.blocks.len() == self.layout.num_blocks(index)
            && piece
                .blocks
                .iter()
                .enumerate()
                .all(|(block, data)| data.len() == self.layout.block_len(index, block))
    }

    pub fn has_piece(&self, index: usize) -> bool {
        self.bitmap.get(index).copied().unwrap_or(false)
    }

    pub fn bitmap(&self) -> &[bool] {
        &self.bitmap
    }

    pub fn missing_pieces(&self) -> Vec<usize> {
        (0..self.bitmap.len()).filter(|i| !self.bitmap[*i]).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.bitmap.iter().all(|owned| *owned)
    }

    /// Blocks of `index` not received yet; empty for owned pieces.
    pub fn missing_blocks(&self, index: usize) -> Vec<Block> {
        if index >= self.bitmap.len() || self.bitmap[index] {
            return Vec::new();
        }
        let received = self.blocks.get(&index);
        self.layout
            .blocks(index)
            .enumerate()
            .filter(|(slot, _)| !received.is_some_and(|received| received[*slot]))
            .map(|(_, block)| block)
            .collect()
    }

    pub fn add_block(&mut self, block: BlockData) -> Status {
        let BlockData { index, begin, data } = block;
        if self.has_piece(index) {
            return Status::Ignored;
        }
        let Some(slot) = self.layout.block_slot(index, begin, data.len()) else {
            return Status::Ignored;
        };

        let num_blocks = self.layout.num_blocks(index);
        let received = self
            .blocks
            .entry(index)
            .or_insert_with(|| vec![false; num_blocks]);
        received[slot] = true;
        self.pieces[index].blocks[slot] = data;
        if received.iter().any(|received| !*received) {
            return Status::Incomplete;
        }

        self.blocks.remove(&index);
        if self.pieces[index].hash() == self.hashes[index] {
            self.bitmap[index] = true;
            Status::Complete
        } else {
            self.pieces[index] = Piece::empty(num_blocks);
            Status::Invalid
        }
    }

    /// Contents of an owned block, if `block` addresses exactly one slot.
    pub fn read_block(&self, block: &Block) -> Option<Vec<u8>> {
        if !self.has_piece(block.index) {
            return None;
        }
        let slot = self
            .layout
            .block_slot(block.index, block.begin, block.length)?;
        Some(self.pieces[block.index].blocks[slot].clone())
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn snapshot(&self) -> SavedState {
        SavedState {
            bitmap: self.bitmap.clone(),
            pieces: self
                .pieces
                .iter()
                .zip(&self.bitmap)
                .map(|(piece, owned)| if *owned { piece.clone() } else { Piece::default() })
                .collect(),
        }
    }
}
