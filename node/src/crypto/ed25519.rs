///! Uses the `ed25519-zebra` crate to implement signing and signature verification.
use ed25519_zebra::{Signature, SigningKey, VerificationKey};

use crate::crypto::{KeyPairError, NodeId};
use crate::utilities::encoding::{from_base58, to_base58};

// Careful with DEBUG, DISPLAY!!!
pub struct Keypair {
    signing_key: SigningKey,
    verification_key: VerificationKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::new(rand::thread_rng()))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from(seed))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verification_key = VerificationKey::from(&signing_key);
        Self {
            signing_key,
            verification_key,
        }
    }

    pub fn node_id(&self) -> NodeId {
        NodeId(self.verification_key.into())
    }

    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let signature: [u8; 64] = self.signing_key.sign(msg).into();
        signature.to_vec()
    }

    pub fn to_base58(&self) -> String {
        to_base58(self.signing_key.as_ref())
    }

    pub fn from_base58(base58: &str) -> Result<Self, KeyPairError> {
        let raw = from_base58(base58).map_err(|_| KeyPairError::InvalidEncoding)?;
        let seed = <[u8; 32]>::try_from(raw.as_slice()).map_err(|_| KeyPairError::SliceLength)?;
        Ok(Self::from_seed(seed))
    }
}

pub(crate) fn verification_key(node_id: &NodeId) -> Result<VerificationKey, KeyPairError> {
    VerificationKey::try_from(&node_id.0[..]).map_err(|_| KeyPairError::PublicKey)
}

pub(crate) fn verify(key: &VerificationKey, msg: &[u8], signature: &[u8]) -> bool {
    let Ok(signature) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    key.verify(&Signature::from(signature), msg).is_ok()
}
