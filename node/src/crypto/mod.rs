//! Crytographic module used for signing and verifying contenders.
//!
//! Nodes are identified by their ed25519 verification key, see [NodeId].

use std::fmt::{Debug, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utilities::encoding::{from_base58, to_base58};
use crate::utilities::hash::HashType;
use crate::utilities::time::LaminaTime;

pub(crate) mod ed25519;

pub use ed25519::Keypair;

#[derive(Error, Debug)]
pub enum KeyPairError {
    #[error("Invalid key encoding")]
    InvalidEncoding,
    #[error("Invalid key length")]
    SliceLength,
    #[error("Invalid public key")]
    PublicKey,
}

/// Identity of a node. It's the raw ed25519 verification key of the node.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) [u8; 32]);

impl NodeId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        to_base58(self.0)
    }

    pub fn from_base58(base58: &str) -> Result<Self, KeyPairError> {
        let raw = from_base58(base58).map_err(|_| KeyPairError::InvalidEncoding)?;
        let inner = <[u8; 32]>::try_from(raw.as_slice()).map_err(|_| KeyPairError::SliceLength)?;
        Ok(Self(inner))
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.to_base58())
    }
}

impl FromStr for NodeId {
    type Err = KeyPairError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

/// Verifies `signature` over `msg` with the verification key of `signer`.
pub fn verify(signer: &NodeId, msg: &[u8], signature: &[u8]) -> bool {
    match ed25519::verification_key(signer) {
        Ok(key) => ed25519::verify(&key, msg, signature),
        Err(err) => {
            log::trace!("Invalid verification key {signer}: {err}");
            false
        }
    }
}

/// Signature of a node over a result hash, stamped with the signing time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Certificate {
    pub signer: NodeId,
    pub timestamp: u64,
    pub signature: Vec<u8>,
}

impl Certificate {
    pub fn prepare(keypair: &Keypair, hash: &HashType) -> Self {
        let timestamp = LaminaTime::now();
        let payload = Self::signed_payload(hash, timestamp);
        Self {
            signer: keypair.node_id(),
            timestamp,
            signature: keypair.sign(&payload),
        }
    }

    pub fn verify(&self, hash: &HashType) -> bool {
        let payload = Self::signed_payload(hash, self.timestamp);
        verify(&self.signer, &payload, &self.signature)
    }

    fn signed_payload(hash: &HashType, timestamp: u64) -> Vec<u8> {
        let mut payload = hash.as_ref().to_vec();
        payload.extend_from_slice(&timestamp.to_be_bytes());
        payload
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sign_ok() {
        let keypair = Keypair::generate();
        let hash = HashType::digest(b"result");

        let certificate = Certificate::prepare(&keypair, &hash);

        assert_eq!(certificate.signer, keypair.node_id());
        assert!(certificate.verify(&hash));
    }

    #[test]
    fn test_sign_fail() {
        let keypair = Keypair::generate();
        let hash = HashType::digest(b"result");

        let mut certificate = Certificate::prepare(&keypair, &hash);
        assert!(!certificate.verify(&HashType::digest(b"other")));

        certificate.timestamp += 1;
        assert!(!certificate.verify(&hash));
    }

    #[test]
    fn test_wrong_signer() {
        let keypair = Keypair::generate();
        let hash = HashType::digest(b"result");

        let mut certificate = Certificate::prepare(&keypair, &hash);
        certificate.signer = Keypair::generate().node_id();

        assert!(!certificate.verify(&hash));
    }

    #[test]
    fn test_node_id_base58() {
        let node_id = Keypair::generate().node_id();
        let parsed = node_id.to_string().parse::<NodeId>().unwrap();
        assert_eq!(node_id, parsed);

        assert!("not-base58!".parse::<NodeId>().is_err());
    }
}
