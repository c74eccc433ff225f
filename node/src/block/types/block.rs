use std::collections::HashSet;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block::types::transaction::Transaction;
use crate::crypto::{Certificate, NodeId};
use crate::utilities::hash::{blake2_256, HashType};
use crate::utilities::merkle::MerkleTree;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BlockError {
    #[error("Sub-block {0} merkle leaves don't hash to its root")]
    MerkleRootMismatch(u32),
    #[error("Sub-block {0} transactions don't match its merkle leaves")]
    TransactionMismatch(u32),
    #[error("Sub-blocks are not ordered by index")]
    SubBlockOrder,
    #[error("Block hash mismatch: claimed {claimed}, computed {computed}")]
    HashMismatch {
        claimed: HashType,
        computed: HashType,
    },
}

/// Agreed content of one sub-block slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubBlock {
    pub sb_index: u32,
    pub merkle_root: HashType,
    pub input_hash: HashType,
    pub merkle_leaves: Vec<HashType>,
    /// Signatures of the delegates which voted for `merkle_root`.
    pub signatures: Vec<Certificate>,
    /// Transactions in merkle leaf order.
    pub transactions: Vec<Transaction>,
}

impl SubBlock {
    pub fn is_empty(&self) -> bool {
        self.merkle_leaves.is_empty()
    }

    /// Checks that leaves hash to the root and that transactions are exactly the leaves.
    ///
    /// The root of an empty sub-block is its input hash.
    pub fn verify(&self) -> Result<(), BlockError> {
        if self.is_empty() {
            if self.merkle_root != self.input_hash {
                return Err(BlockError::MerkleRootMismatch(self.sb_index));
            }
            return if self.transactions.is_empty() {
                Ok(())
            } else {
                Err(BlockError::TransactionMismatch(self.sb_index))
            };
        }

        if !MerkleTree::verify(&self.merkle_leaves, &self.merkle_root) {
            return Err(BlockError::MerkleRootMismatch(self.sb_index));
        }

        let matches_leaves = self.transactions.len() == self.merkle_leaves.len()
            && self
                .transactions
                .iter()
                .zip(&self.merkle_leaves)
                .all(|(tx, leaf)| tx.hash() == *leaf);
        if !matches_leaves {
            return Err(BlockError::TransactionMismatch(self.sb_index));
        }
        Ok(())
    }
}

/// A finalized block as stored by masternodes and served to catching up nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub block_hash: HashType,
    pub block_num: u64,
    pub prev_block_hash: HashType,
    /// Masternodes which store this block.
    pub block_owners: Vec<NodeId>,
    pub sub_blocks: Vec<SubBlock>,
}

impl BlockData {
    pub fn new(
        block_num: u64,
        prev_block_hash: HashType,
        block_owners: Vec<NodeId>,
        mut sub_blocks: Vec<SubBlock>,
    ) -> Self {
        sub_blocks.sort_by_key(|sb| sb.sb_index);
        let block_hash = compute_block_hash(
            sub_blocks.iter().map(|sb| &sb.merkle_root),
            &prev_block_hash,
        );
        Self {
            block_hash,
            block_num,
            prev_block_hash,
            block_owners,
            sub_blocks,
        }
    }

    /// First block of every chain. All of its hashes are zero.
    pub fn genesis() -> Self {
        Self {
            block_hash: HashType::ZERO,
            block_num: 0,
            prev_block_hash: HashType::ZERO,
            block_owners: vec![],
            sub_blocks: vec![],
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.block_num == 0
    }

    pub fn transaction_count(&self) -> usize {
        self.sub_blocks.iter().map(|sb| sb.transactions.len()).sum()
    }

    /// Verifies every sub-block and re-derives the block hash.
    ///
    /// It doesn't check that the block links to any particular chain.
    pub fn verify(&self) -> Result<(), BlockError> {
        let mut seen = HashSet::new();
        let mut previous = None;
        for sub_block in &self.sub_blocks {
            if !seen.insert(sub_block.sb_index) || previous > Some(sub_block.sb_index) {
                return Err(BlockError::SubBlockOrder);
            }
            previous = Some(sub_block.sb_index);
            sub_block.verify()?;
        }

        let computed = compute_block_hash(
            self.sub_blocks.iter().map(|sb| &sb.merkle_root),
            &self.prev_block_hash,
        );
        if computed != self.block_hash {
            return Err(BlockError::HashMismatch {
                claimed: self.block_hash,
                computed,
            });
        }
        Ok(())
    }
}

impl Display for BlockData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "block_num: {}, hash: {}, prev: {}, sub-blocks: {}, transactions: {}",
            self.block_num,
            self.block_hash,
            self.prev_block_hash,
            self.sub_blocks.len(),
            self.transaction_count()
        )
    }
}

/// `hash(sub_block_roots_in_index_order ‖ prev_block_hash)`
pub fn compute_block_hash<'a>(
    sub_block_roots: impl IntoIterator<Item = &'a HashType>,
    prev_block_hash: &HashType,
) -> HashType {
    let mut bytes = vec![];
    for root in sub_block_roots {
        bytes.extend_from_slice(root.as_ref());
    }
    bytes.extend_from_slice(prev_block_hash.as_ref());
    blake2_256(&bytes).into()
}

#[cfg(test)]
mod test {
    use super::*;

    fn sub_block(sb_index: u32, payloads: &[&[u8]]) -> SubBlock {
        let transactions = payloads
            .iter()
            .map(|p| Transaction::from(*p))
            .collect::<Vec<_>>();
        let merkle_leaves = transactions.iter().map(Transaction::hash).collect::<Vec<_>>();
        let merkle_root = MerkleTree::from_leaves(merkle_leaves.clone())
            .unwrap()
            .root();
        SubBlock {
            sb_index,
            merkle_root,
            input_hash: HashType::digest(&sb_index.to_be_bytes()),
            merkle_leaves,
            signatures: vec![],
            transactions,
        }
    }

    #[test]
    fn test_block_hash_uses_index_order() {
        let prev = HashType::digest(b"prev");
        let first = sub_block(0, &[b"a"]);
        let second = sub_block(1, &[b"b"]);

        let block = BlockData::new(1, prev, vec![], vec![second.clone(), first.clone()]);

        assert_eq!(block.sub_blocks[0].sb_index, 0);
        assert_eq!(
            block.block_hash,
            compute_block_hash([&first.merkle_root, &second.merkle_root], &prev)
        );
        assert!(block.verify().is_ok());
    }

    #[test]
    fn test_tampered_hash_fails() {
        let mut block = BlockData::new(1, HashType::ZERO, vec![], vec![sub_block(0, &[b"a"])]);
        block.block_hash = HashType::digest(b"forged");

        assert!(matches!(block.verify(), Err(BlockError::HashMismatch { .. })));
    }

    #[test]
    fn test_tampered_transaction_fails() {
        let sub_blocks = vec![sub_block(0, &[b"a", b"b"])];
        let mut block = BlockData::new(1, HashType::ZERO, vec![], sub_blocks);
        block.sub_blocks[0].transactions[1] = Transaction::from(&b"c"[..]);

        assert_eq!(block.verify(), Err(BlockError::TransactionMismatch(0)));
    }

    #[test]
    fn test_tampered_root_fails() {
        let mut block = BlockData::new(1, HashType::ZERO, vec![], vec![sub_block(0, &[b"a"])]);
        block.sub_blocks[0].merkle_leaves = vec![HashType::digest(b"x")];

        assert_eq!(block.verify(), Err(BlockError::MerkleRootMismatch(0)));
    }

    #[test]
    fn test_stripped_sub_block_fails() {
        let mut block = BlockData::new(1, HashType::ZERO, vec![], vec![sub_block(0, &[b"a"])]);
        block.sub_blocks[0].merkle_leaves.clear();
        block.sub_blocks[0].transactions.clear();

        assert_eq!(block.verify(), Err(BlockError::MerkleRootMismatch(0)));
    }

    #[test]
    fn test_empty_sub_block_root_is_input_hash() {
        let mut empty = sub_block(0, &[b"a"]);
        empty.merkle_leaves.clear();
        empty.transactions.clear();
        empty.merkle_root = empty.input_hash;
        let block = BlockData::new(1, HashType::ZERO, vec![], vec![empty]);

        assert!(block.verify().is_ok());
    }

    #[test]
    fn test_duplicate_sub_block_index_fails() {
        let mut block = BlockData::new(1, HashType::ZERO, vec![], vec![sub_block(0, &[b"a"])]);
        block.sub_blocks.push(sub_block(0, &[b"b"]));

        assert_eq!(block.verify(), Err(BlockError::SubBlockOrder));
    }

    #[test]
    fn test_genesis() {
        let genesis = BlockData::genesis();
        assert!(genesis.is_genesis());
        assert!(genesis.block_hash.is_zero());
    }
}
