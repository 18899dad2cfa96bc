use std::fmt;

use anyhow::{Result, anyhow};
use sha1::Digest;

#[derive(PartialEq, Eq, Clone, Hash)]
pub struct Sha1(pub [u8; 20]);

impl Sha1 {
    pub const LEN: usize = 20;

    pub fn digest(data: &[u8]) -> Self {
        Self(sha1::Sha1::digest(data).into())
    }

    /// Hashes a sequence of chunks as if they were one contiguous buffer.
    pub fn digest_all<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = sha1::Sha1::new();
        for chunk in chunks {
            hasher.update(chunk);
        }
        Self(hasher.finalize().into())
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = hex::decode(hex)?;
        Self::from_slice(&bytes).ok_or_else(|| anyhow!("sha1 must be {} bytes", Self::LEN))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; Self::LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Debug for Sha1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha1({})", hex::encode(self.0))
    }
}

impl fmt::Display for Sha1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_known_value() {
        assert_eq!(
            Sha1::digest(b"abc"),
            Sha1::from_hex("a9993e364706816aba3e25717850c26c9cd0d89d").unwrap()
        );
    }

    #[test]
    fn chunked_digest_matches_contiguous_digest() {
        let chunks: [&[u8]; 3] = [b"hello", b" ", b"world"];

        assert_eq!(Sha1::digest_all(chunks), Sha1::digest(b"hello world"));
    }

    #[test]
    fn reject_wrong_length() {
        assert!(Sha1::from_hex("abcd").is_err());
        assert!(Sha1::from_slice(&[0; 19]).is_none());
    }
}
