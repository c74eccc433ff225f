use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::block::types::transaction::Transaction;
use crate::crypto::{Certificate, Keypair, NodeId};
use crate::utilities::hash::HashType;
use crate::utilities::merkle::MerkleTree;

/// A delegate's signed proposal for one sub-block slot of the next block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBlockContender {
    pub sb_index: u32,
    /// Hash of the raw transaction batch before execution.
    pub input_hash: HashType,
    /// Merkle root over `merkle_leaves`, or `input_hash` for an empty sub-block.
    pub result_hash: HashType,
    pub merkle_leaves: Vec<HashType>,
    pub transactions: Vec<Transaction>,
    /// Chain tip the proposal was built against.
    pub prev_block_hash: HashType,
    /// Signature over `result_hash`.
    pub signature: Certificate,
}

impl SubBlockContender {
    /// Builds and signs a contender from executed transactions.
    ///
    /// Without transactions this is the same as [SubBlockContender::empty].
    pub fn new(
        sb_index: u32,
        input_hash: HashType,
        transactions: Vec<Transaction>,
        prev_block_hash: HashType,
        keypair: &Keypair,
    ) -> Self {
        let merkle_leaves = transactions.iter().map(Transaction::hash).collect::<Vec<_>>();
        let result_hash = match MerkleTree::from_leaves(merkle_leaves.clone()) {
            Ok(tree) => tree.root(),
            Err(_) => input_hash,
        };
        let signature = Certificate::prepare(keypair, &result_hash);
        Self {
            sb_index,
            input_hash,
            result_hash,
            merkle_leaves,
            transactions,
            prev_block_hash,
            signature,
        }
    }

    /// Contender for a sub-block without transactions.
    pub fn empty(
        sb_index: u32,
        input_hash: HashType,
        prev_block_hash: HashType,
        keypair: &Keypair,
    ) -> Self {
        Self::new(sb_index, input_hash, vec![], prev_block_hash, keypair)
    }

    pub fn signer(&self) -> &NodeId {
        &self.signature.signer
    }

    pub fn is_empty(&self) -> bool {
        self.merkle_leaves.is_empty()
    }
}

impl Display for SubBlockContender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sb_index: {}, input: {}, result: {}, leaves: {}, signer: {}",
            self.sb_index,
            self.input_hash,
            self.result_hash,
            self.merkle_leaves.len(),
            self.signature.signer
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_new_contender() {
        let keypair = Keypair::generate();
        let transactions = vec![Transaction::from(&b"a"[..]), Transaction::from(&b"b"[..])];
        let input_hash = HashType::digest(b"input");

        let contender = SubBlockContender::new(
            0,
            input_hash,
            transactions.clone(),
            HashType::ZERO,
            &keypair,
        );

        assert_eq!(contender.merkle_leaves, vec![transactions[0].hash(), transactions[1].hash()]);
        assert!(MerkleTree::verify(&contender.merkle_leaves, &contender.result_hash));
        assert!(contender.signature.verify(&contender.result_hash));
        assert_eq!(contender.signer(), &keypair.node_id());
    }

    #[test]
    fn test_empty_contender_uses_input_hash() {
        let keypair = Keypair::generate();
        let input_hash = HashType::digest(b"input");

        let contender = SubBlockContender::empty(1, input_hash, HashType::ZERO, &keypair);

        assert!(contender.is_empty());
        assert_eq!(contender.result_hash, input_hash);
        assert!(contender.signature.verify(&input_hash));
    }
}
