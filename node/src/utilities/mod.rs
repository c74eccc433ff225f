pub(crate) mod encoding;
pub(crate) mod hash;
pub(crate) mod merkle;
pub(crate) mod time;

pub use crate::utilities::encoding::{decode, encode, from_base58, to_base58};
pub use crate::utilities::hash::{blake2_256, HashType};
pub use crate::utilities::merkle::{MerkleError, MerkleTree};
