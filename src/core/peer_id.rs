use std::fmt;

use rand::RngCore;

const PREFIX: &[u8; 8] = b"-PW0100-";

/// 20-byte identifier a client announces in its handshake and to the tracker.
#[derive(PartialEq, Eq, Clone, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    pub fn random() -> Self {
        let mut data = [0; 20];
        data[..PREFIX.len()].copy_from_slice(PREFIX);
        rand::rng().fill_bytes(&mut data[PREFIX.len()..]);
        Self(data)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(self.0))
    }
}
