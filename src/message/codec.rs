use tokio_util::bytes::{Buf, BufMut, BytesMut};

use crate::codec::TransportMessage;
use crate::error::{PeerError, Result};
use crate::message::{Block, BlockData, Message, pack_bits, unpack_bits};

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;

pub const LENGTH_SIZE: usize = 4;

/// Type byte plus the index and begin fields of a `piece` message.
pub const PIECE_HEADER: usize = 9;

impl Message {
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.transport_bytes());
        match self {
            Message::KeepAlive => dst.put_u32(0),
            Message::Choke => {
                dst.put_u32(1);
                dst.put_u8(ID_CHOKE);
            }
            Message::Unchoke => {
                dst.put_u32(1);
                dst.put_u8(ID_UNCHOKE);
            }
            Message::Interested => {
                dst.put_u32(1);
                dst.put_u8(ID_INTERESTED);
            }
            Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(ID_NOT_INTERESTED);
            }
            Message::Have(index) => {
                dst.put_u32(5);
                dst.put_u8(ID_HAVE);
                dst.put_u32(*index as u32);
            }
            Message::Bitfield(bits) => {
                let bytes = pack_bits(bits);
                dst.put_u32(1 + (bytes.len() as u32));
                dst.put_u8(ID_BITFIELD);
                dst.extend_from_slice(&bytes);
            }
            Message::Request(block) => {
                dst.put_u32(13);
                dst.put_u8(ID_REQUEST);
                encode_block(block, dst);
            }
            Message::Piece(BlockData { index, begin, data }) => {
                dst.put_u32((PIECE_HEADER + data.len()) as u32);
                dst.put_u8(ID_PIECE);
                dst.put_u32(*index as u32);
                dst.put_u32(*begin as u32);
                dst.extend_from_slice(data);
            }
            Message::Cancel(block) => {
                dst.put_u32(13);
                dst.put_u8(ID_CANCEL);
                encode_block(block, dst);
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.to_vec()
    }

    /// Decodes one length-prefixed message from the start of `src`.
    ///
    /// Exactly the declared number of bytes is consumed; anything after the
    /// frame is ignored. Bitfields are resized to `num_pieces`, dropping the
    /// padding bits whatever their value.
    pub fn decode(mut src: &[u8], num_pieces: usize) -> Result<Self> {
        if src.len() < LENGTH_SIZE {
            return Err(PeerError::TruncatedMessage {
                declared: LENGTH_SIZE,
                available: src.len(),
            });
        }
        let length = src.get_u32() as usize;
        if length == 0 {
            return Ok(Message::KeepAlive);
        }
        if src.len() < length {
            return Err(PeerError::TruncatedMessage {
                declared: length,
                available: src.len(),
            });
        }

        let mut payload = &src[..length];
        let id = payload.get_u8();
        match (id, length) {
            (ID_CHOKE, 1) => Ok(Message::Choke),
            (ID_UNCHOKE, 1) => Ok(Message::Unchoke),
            (ID_INTERESTED, 1) => Ok(Message::Interested),
            (ID_NOT_INTERESTED, 1) => Ok(Message::NotInterested),
            (ID_HAVE, 5) => Ok(Message::Have(payload.get_u32() as usize)),
            (ID_BITFIELD, _) => {
                let mut bits = unpack_bits(payload);
                bits.resize(num_pieces, false);
                Ok(Message::Bitfield(bits))
            }
            (ID_REQUEST, 13) => Ok(Message::Request(decode_block(&mut payload))),
            (ID_PIECE, PIECE_HEADER..) => {
                let index = payload.get_u32() as usize;
                let begin = payload.get_u32() as usize;
                Ok(Message::Piece(BlockData::new(index, begin, payload.to_vec())))
            }
            (ID_CANCEL, 13) => Ok(Message::Cancel(decode_block(&mut payload))),
            (ID_CHOKE..=ID_CANCEL, _) => Err(PeerError::ProtocolViolation(format!(
                "message id {} with invalid length {}",
                id, length
            ))),
            _ => Err(PeerError::ProtocolViolation(format!(
                "unknown message id {}",
                id
            ))),
        }
    }
}

fn encode_block(block: &Block, dst: &mut BytesMut) {
    dst.put_u32(block.index as u32);
    dst.put_u32(block.begin as u32);
    dst.put_u32(block.length as u32);
}

fn decode_block(src: &mut &[u8]) -> Block {
    let index = src.get_u32() as usize;
    let begin = src.get_u32() as usize;
    let length = src.get_u32() as usize;
    Block::new(index, begin, length)
}

impl TransportMessage for Message {
    fn transport_bytes(&self) -> usize {
        let payload_size = match self {
            Self::KeepAlive => 0,
            Self::Choke | Self::Unchoke | Self::Interested | Self::NotInterested => 1,
            Self::Have(_) => 5,
            Self::Bitfield(bits) => 1 + bits.len().div_ceil(8),
            Self::Request(_) | Self::Cancel(_) => 13,
            Self::Piece(block) => PIECE_HEADER + block.data.len(),
        };
        LENGTH_SIZE + payload_size
    }
}
