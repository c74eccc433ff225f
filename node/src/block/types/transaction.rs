use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::utilities::hash::HashType;

/// Executed transaction payload. Its content is opaque to consensus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction {
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    /// Merkle leaf of the transaction.
    pub fn hash(&self) -> HashType {
        HashType::digest(&self.payload)
    }
}

impl From<&[u8]> for Transaction {
    fn from(payload: &[u8]) -> Self {
        Self::new(payload.to_vec())
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx {} ({} bytes)", self.hash(), self.payload.len())
    }
}
