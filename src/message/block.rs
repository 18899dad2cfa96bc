/// A request for `length` bytes starting at `begin` within piece `index`.
#[derive(Debug, PartialEq, Clone, Copy, Eq, Hash)]
pub struct Block {
    pub index: usize,
    pub begin: usize,
    pub length: usize,
}

impl Block {
    pub fn new(index: usize, begin: usize, length: usize) -> Self {
        Self {
            index,
            begin,
            length,
        }
    }
}

/// Block contents as carried by a `Piece` message.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BlockData {
    pub index: usize,
    pub begin: usize,
    pub data: Vec<u8>,
}

impl BlockData {
    pub fn new(index: usize, begin: usize, data: Vec<u8>) -> Self {
        Self { index, begin, data }
    }
}

impl From<&BlockData> for Block {
    fn from(value: &BlockData) -> Self {
        Self::new(value.index, value.begin, value.data.len())
    }
}
