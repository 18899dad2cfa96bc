use size::Size;

use crate::message::Block;

/// Geometry of a single-file torrent: how the file splits into pieces and
/// pieces into blocks. Only the last block of the last piece may be short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub piece_size: usize,
    pub total_size: usize,
    pub block_size: usize,
}

impl Layout {
    pub fn new(piece_size: usize, total_size: usize, block_size: Size) -> Self {
        Self {
            piece_size,
            total_size,
            block_size: block_size.bytes() as usize,
        }
    }

    pub fn total_pieces(&self) -> usize {
        self.total_size.div_ceil(self.piece_size)
    }

    pub fn piece_offset(&self, piece: usize) -> usize {
        self.piece_size * piece
    }

    pub fn piece_len(&self, piece: usize) -> usize {
        let piece_start = self.piece_offset(piece).min(self.total_size);
        let piece_end = (piece_start + self.piece_size).min(self.total_size);
        piece_end - piece_start
    }

    pub fn num_blocks(&self, piece: usize) -> usize {
        self.piece_len(piece).div_ceil(self.block_size)
    }

    pub fn block_len(&self, piece: usize, block: usize) -> usize {
        let offset = block * self.block_size;
        self.piece_len(piece).saturating_sub(offset).min(self.block_size)
    }

    /// Slot addressed by `(piece, begin, length)`, if `begin` sits on a block
    /// boundary and `length` is exactly what that slot holds.
    pub fn block_slot(&self, piece: usize, begin: usize, length: usize) -> Option<usize> {
        if piece >= self.total_pieces() || begin % self.block_size != 0 {
            return None;
        }
        let block = begin / self.block_size;
        if block >= self.num_blocks(piece) || length != self.block_len(piece, block) {
            return None;
        }
        Some(block)
    }

    pub fn blocks(&self, piece: usize) -> Blocks {
        Blocks {
            block_size: self.block_size,
            piece,
            offset: 0,
            end: self.piece_len(piece),
        }
    }
}

pub struct Blocks {
    block_size: usize,
    piece: usize,
    offset: usize,
    end: usize,
}

impl Iterator for Blocks {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset < self.end {
            let block_size = self.block_size.min(self.end - self.offset);
            let block = Block::new(self.piece, self.offset, block_size);
            self.offset += block_size;
            Some(block)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use size::KiB;

    use super::*;

    const BLOCK_SIZE: Size = Size::from_const(KiB);
    const BLOCK_SIZE_BYTES: usize = BLOCK_SIZE.bytes() as usize;

    fn layout(piece_size: usize, total_size: usize) -> Layout {
        Layout::new(piece_size, total_size, BLOCK_SIZE)
    }

    #[test]
    fn one_piece_one_block() {
        let mut blocks = layout(1024, 1024).blocks(0);

        assert_eq!(Some(Block::new(0, 0, BLOCK_SIZE_BYTES)), blocks.next());
        assert_eq!(None, blocks.next());
    }

    #[test]
    fn one_piece_multiple_blocks() {
        let mut blocks = layout(2048, 2048).blocks(0);

        assert_eq!(Some(Block::new(0, 0, BLOCK_SIZE_BYTES)), blocks.next());
        assert_eq!(Some(Block::new(0, 1024, BLOCK_SIZE_BYTES)), blocks.next());
        assert_eq!(None, blocks.next());
    }

    #[test]
    fn uneven_block_sizes() {
        let mut blocks = layout(1024 + 42, 2048).blocks(0);

        assert_eq!(Some(Block::new(0, 0, BLOCK_SIZE_BYTES)), blocks.next());
        assert_eq!(Some(Block::new(0, 1024, 42)), blocks.next());
        assert_eq!(None, blocks.next());
    }

    #[test]
    fn uneven_block_sizes_in_last_piece() {
        let layout = layout(3072, 8192);
        assert_eq!(layout.total_pieces(), 3);

        let mut blocks = layout.blocks(1);
        assert_eq!(Some(Block::new(1, 0, BLOCK_SIZE_BYTES)), blocks.next());
        assert_eq!(Some(Block::new(1, 1024, BLOCK_SIZE_BYTES)), blocks.next());
        assert_eq!(Some(Block::new(1, 2048, BLOCK_SIZE_BYTES)), blocks.next());
        assert_eq!(None, blocks.next());

        let mut blocks = layout.blocks(2);
        assert_eq!(Some(Block::new(2, 0, BLOCK_SIZE_BYTES)), blocks.next());
        assert_eq!(Some(Block::new(2, 1024, BLOCK_SIZE_BYTES)), blocks.next());
        assert_eq!(None, blocks.next());
    }

    #[test]
    fn short_tail_block() {
        let layout = layout(2048, 2048 + 1500);

        assert_eq!(layout.total_pieces(), 2);
        assert_eq!(layout.piece_len(1), 1500);
        assert_eq!(layout.num_blocks(1), 2);
        assert_eq!(layout.block_len(1, 1), 476);
    }

    #[test]
    fn block_slots() {
        let layout = layout(2048, 2048 + 1500);

        assert_eq!(layout.block_slot(0, 1024, 1024), Some(1));
        assert_eq!(layout.block_slot(1, 1024, 476), Some(1));
        // misaligned
        assert_eq!(layout.block_slot(0, 100, 1024), None);
        // wrong length for the slot
        assert_eq!(layout.block_slot(1, 1024, 1024), None);
        assert_eq!(layout.block_slot(0, 0, 10), None);
        // out of range
        assert_eq!(layout.block_slot(0, 2048, 1024), None);
        assert_eq!(layout.block_slot(2, 0, 1024), None);
    }
}
