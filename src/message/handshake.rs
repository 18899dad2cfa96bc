use crate::codec::TransportMessage;
use crate::core::{PeerId, Sha1};
use crate::error::{PeerError, Result};

pub const PROTOCOL: &str = "BitTorrent protocol";

const RESERVED_LEN: usize = 8;

/// Bytes following the protocol string: reserved bytes, info hash, peer id.
pub const HANDSHAKE_TAIL: usize = RESERVED_LEN + Sha1::LEN + 20;

/// The first message on every connection, `49 + len(pstr)` bytes long.
///
/// _handshake: <pstrlen><pstr><reserved><info\_hash><peer\_id>_
///
/// The dialling side sends first. The accepting side reads the remote
/// handshake, checks the info hash against the torrent it serves and only then
/// replies; a mismatch drops the connection without a reply.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Handshake {
    pub protocol: String,
    pub info_hash: Sha1,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: Sha1, peer_id: PeerId) -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            info_hash,
            peer_id,
        }
    }

    pub fn is_standard_protocol(&self) -> bool {
        self.protocol == PROTOCOL
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.transport_bytes());
        // decoded protocols come from a one-byte length
        bytes.push(self.protocol.len() as u8);
        bytes.extend_from_slice(self.protocol.as_bytes());
        bytes.extend_from_slice(&[0; RESERVED_LEN]);
        bytes.extend_from_slice(&self.info_hash.0);
        bytes.extend_from_slice(&self.peer_id.0);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let Some((&pstrlen, rest)) = bytes.split_first() else {
            return Err(malformed("empty handshake"));
        };
        let pstrlen = pstrlen as usize;
        if rest.len() < pstrlen + HANDSHAKE_TAIL {
            return Err(malformed(format!(
                "expected {} bytes, got {}",
                1 + pstrlen + HANDSHAKE_TAIL,
                bytes.len()
            )));
        }

        let (protocol, rest) = rest.split_at(pstrlen);
        let protocol = String::from_utf8(protocol.to_vec())
            .map_err(|_| malformed("protocol string is not utf-8"))?;

        let (reserved, rest) = rest.split_at(RESERVED_LEN);
        if reserved.iter().any(|byte| *byte != 0) {
            return Err(malformed("reserved bytes must be zero"));
        }

        let (info_hash, rest) = rest.split_at(Sha1::LEN);
        let info_hash = Sha1::from_slice(info_hash).ok_or_else(|| malformed("bad info hash"))?;
        let mut peer_id = [0; 20];
        peer_id.copy_from_slice(&rest[..20]);

        Ok(Self {
            protocol,
            info_hash,
            peer_id: PeerId(peer_id),
        })
    }

    /// Checks a remote handshake against the torrent we are serving.
    pub fn validate(&self, info_hash: &Sha1) -> Result<()> {
        if !self.is_standard_protocol() {
            return Err(malformed(format!("unsupported protocol {:?}", self.protocol)));
        }
        if &self.info_hash != info_hash {
            return Err(malformed(format!("info hash mismatch: {}", self.info_hash)));
        }
        Ok(())
    }
}

fn malformed(reason: impl Into<String>) -> PeerError {
    PeerError::MalformedHandshake(reason.into())
}

impl TransportMessage for Handshake {
    fn transport_bytes(&self) -> usize {
        1 + // pstr len
            self.protocol.len() + // pstr bytes
            HANDSHAKE_TAIL
    }
}
