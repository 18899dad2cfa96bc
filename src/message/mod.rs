mod bits;
mod block;
mod codec;
mod handshake;

use std::fmt;

pub use bits::*;
pub use block::*;
pub use codec::*;
pub use handshake::*;

/// All of the remaining messages in the protocol take the form of <length prefix><message
/// ID><payload>. The length prefix is a four byte big-endian value. The message ID is a single
/// decimal byte. The payload is message dependent.
#[derive(PartialEq, Eq, Clone)]
pub enum Message {
    /// # keep-alive: <len=0000>
    ///
    /// A message with zero bytes, no ID and no payload. Sent when nothing else has been sent for
    /// a third of the peer timeout, so the remote watchdog does not drop the connection.
    KeepAlive,

    /// # choke: <len=0001><id=0>
    Choke,

    /// # unchoke: <len=0001><id=1>
    Unchoke,

    /// # interested: <len=0001><id=2>
    Interested,

    /// # not interested: <len=0001><id=3>
    NotInterested,

    /// # have: <len=0005><id=4><piece index>
    ///
    /// The payload is the zero-based index of a piece that has just been downloaded and verified
    /// via the hash.
    Have(usize),

    /// # bitfield: <len=0001+X><id=5><bitfield>
    ///
    /// Sent right after the handshake by both sides. The high bit in the first byte corresponds
    /// to piece index 0. Spare bits at the end are zero on the way out and ignored on the way in.
    Bitfield(Vec<bool>),

    /// # request: <len=0013><id=6><index><begin><length>
    Request(Block),

    /// # piece: <len=0009+X><id=7><index><begin><block>
    ///
    /// X is the length of the block, a subset of the piece specified by index.
    Piece(BlockData),

    /// # cancel: <len=0013><id=8><index><begin><length>
    Cancel(Block),
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepAlive => write!(f, "KeepAlive"),
            Self::Choke => write!(f, "Choke"),
            Self::Unchoke => write!(f, "Unchoke"),
            Self::Interested => write!(f, "Interested"),
            Self::NotInterested => write!(f, "NotInterested"),
            Self::Have(index) => write!(f, "Have({})", index),
            Self::Bitfield(bits) => {
                let owned = bits.iter().filter(|bit| **bit).count();
                write!(f, "Bitfield({}/{})", owned, bits.len())
            }
            Self::Request(block) => write!(
                f,
                "Request(index: {}, begin: {}, length: {})",
                block.index, block.begin, block.length
            ),
            Self::Piece(block) => write!(
                f,
                "Piece(index: {}, begin: {}, length: {})",
                block.index,
                block.begin,
                block.data.len()
            ),
            Self::Cancel(block) => write!(
                f,
                "Cancel(index: {}, begin: {}, length: {})",
                block.index, block.begin, block.length
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::TransportMessage;
    use crate::core::{PeerId, Sha1};
    use crate::error::PeerError;

    use super::*;

    const NUM_PIECES: usize = 16;

    fn verify_encode_decode(message: Message) {
        let bytes = message.to_bytes();
        assert_eq!(bytes.len(), message.transport_bytes());

        let message_read = Message::decode(&bytes, NUM_PIECES).expect("unable to decode");
        assert_eq!(message_read, message);
    }

    #[test]
    fn handshake() {
        let info_hash = Sha1(*b"0123456789abcdefghij");
        let peer_id = PeerId(*b"-PW0100-000000000001");
        let handshake = Handshake::new(info_hash, peer_id);

        let bytes = handshake.encode();
        assert_eq!(bytes.len(), handshake.transport_bytes());
        assert_eq!(bytes[0] as usize, PROTOCOL.len());
        assert_eq!(&bytes[1..20], PROTOCOL.as_bytes());
        assert_eq!(&bytes[20..28], &[0; 8]);

        let handshake_read = Handshake::decode(&bytes).expect("unable to decode");
        assert_eq!(handshake, handshake_read);
    }

    #[test]
    fn handshake_too_short() {
        let bytes = Handshake::new(Sha1([1; 20]), PeerId([2; 20])).encode();
        let result = Handshake::decode(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(PeerError::MalformedHandshake(_))));
    }

    #[test]
    fn handshake_reserved_bytes_set() {
        let mut bytes = Handshake::new(Sha1([1; 20]), PeerId([2; 20])).encode();
        bytes[25] = 0x10;
        let result = Handshake::decode(&bytes);
        assert!(matches!(result, Err(PeerError::MalformedHandshake(_))));
    }

    #[test]
    fn handshake_foreign_info_hash() {
        let handshake = Handshake::new(Sha1([1; 20]), PeerId([2; 20]));
        assert!(handshake.validate(&Sha1([1; 20])).is_ok());
        assert!(matches!(
            handshake.validate(&Sha1([3; 20])),
            Err(PeerError::MalformedHandshake(_))
        ));
    }

    #[test]
    fn keep_alive() {
        verify_encode_decode(Message::KeepAlive);
        assert_eq!(Message::KeepAlive.to_bytes(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn choke() {
        verify_encode_decode(Message::Choke);
    }

    #[test]
    fn unchoke() {
        verify_encode_decode(Message::Unchoke);
    }

    #[test]
    fn interested() {
        verify_encode_decode(Message::Interested);
    }

    #[test]
    fn not_interested() {
        verify_encode_decode(Message::NotInterested);
    }

    #[test]
    fn have() {
        verify_encode_decode(Message::Have(32768));
        assert_eq!(
            Message::Have(32768).to_bytes(),
            vec![0, 0, 0, 5, 4, 0, 0, 0x80, 0]
        );
    }

    #[test]
    fn bitfield() {
        let bits = (0..NUM_PIECES).map(|i| i % 3 != 1).collect();
        verify_encode_decode(Message::Bitfield(bits));
    }

    #[test]
    fn bitfield_ignores_pad_bits() {
        // 3 pieces, every pad bit set
        let bytes = [0, 0, 0, 2, 5, 0b1011_1111];
        let message = Message::decode(&bytes, 3).expect("unable to decode");
        assert_eq!(message, Message::Bitfield(vec![true, false, true]));
    }

    #[test]
    fn request() {
        verify_encode_decode(Message::Request(Block::new(11, 256, 264)));
    }

    #[test]
    fn piece() {
        verify_encode_decode(Message::Piece(BlockData::new(
            11,
            256,
            vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02, 0x04],
        )));
    }

    #[test]
    fn cancel() {
        verify_encode_decode(Message::Cancel(Block::new(11, 256, 264)));
    }

    #[test]
    fn decode_consumes_declared_length_only() {
        let mut bytes = Message::Have(7).to_bytes();
        bytes.extend_from_slice(&Message::Choke.to_bytes());
        assert_eq!(Message::decode(&bytes, NUM_PIECES).ok(), Some(Message::Have(7)));
    }

    #[test]
    fn truncated_have() {
        let bytes = [0, 0, 0, 5, 4, 0, 0];
        let result = Message::decode(&bytes, NUM_PIECES);
        assert!(matches!(
            result,
            Err(PeerError::TruncatedMessage {
                declared: 5,
                available: 3
            })
        ));
    }

    #[test]
    fn truncated_length_prefix() {
        let result = Message::decode(&[0, 0], NUM_PIECES);
        assert!(matches!(result, Err(PeerError::TruncatedMessage { .. })));
    }

    #[test]
    fn unknown_message_id() {
        let bytes = [0, 0, 0, 3, 20, 1, 2];
        let result = Message::decode(&bytes, NUM_PIECES);
        assert!(matches!(result, Err(PeerError::ProtocolViolation(_))));
    }

    #[test]
    fn fixed_length_mismatch() {
        let bytes = [0, 0, 0, 9, 4, 0, 0, 0, 1, 0, 0, 0, 2];
        let result = Message::decode(&bytes, NUM_PIECES);
        assert!(matches!(result, Err(PeerError::ProtocolViolation(_))));
    }
}
