use std::fmt::{Debug, Display};

use digest::consts::U32;
use digest::Digest;
use serde::{Deserialize, Serialize};

use crate::utilities::encoding::{from_hex, to_hex};

pub fn blake2_256(data: &[u8]) -> [u8; 32] {
    let mut dest = [0; 32];
    type Blake2b256 = blake2::Blake2b<U32>;
    dest.copy_from_slice(Blake2b256::digest(data).as_slice());
    dest
}

/// 32 byte hash used for transactions, merkle nodes and blocks.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HashType([u8; 32]);

impl HashType {
    pub const ZERO: HashType = HashType([0; 32]);

    pub const fn new(inner: [u8; 32]) -> Self {
        Self(inner)
    }

    /// Hashes `data` with the default hasher.
    pub fn digest(data: &[u8]) -> Self {
        Self(blake2_256(data))
    }

    pub fn inner(&self) -> [u8; 32] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    pub fn from_hex(hex: &str) -> anyhow::Result<Self> {
        let bytes = from_hex(hex)?;
        let inner = <[u8; 32]>::try_from(bytes.as_slice())
            .map_err(|_| anyhow::anyhow!("Invalid hash length: {}", bytes.len()))?;
        Ok(Self(inner))
    }
}

impl From<[u8; 32]> for HashType {
    fn from(inner: [u8; 32]) -> Self {
        Self(inner)
    }
}

impl AsRef<[u8]> for HashType {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for HashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", to_hex(self.0))
    }
}

impl Debug for HashType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HashType({})", to_hex(self.0))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let hash = HashType::digest(b"lamina");
        let parsed = HashType::from_hex(&hash.to_string()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_invalid_hex_length() {
        assert!(HashType::from_hex("abcd").is_err());
    }
}
