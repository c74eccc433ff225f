//! Binary Merkle tree over an ordered list of leaves.
//!
//! Leaf order is part of the fingerprint: it encodes transaction order, so permuting
//! leaves changes the root.
//!
//! Nodes are paired by index on every level. When a level has an odd number of nodes
//! the last one has no sibling and is carried up to the next level unchanged (it is
//! neither duplicated nor padded). Every node must apply exactly this rule, otherwise
//! roots computed by different nodes for the same leaves would disagree.
//!
//! Building a tree from an empty leaf list is an error. Empty sub-blocks don't have a
//! Merkle root, they are identified by their input hash instead.
use thiserror::Error;

use crate::utilities::hash::{blake2_256, HashType};

pub(crate) type Result<T> = std::result::Result<T, MerkleError>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Merkle tree can't be built from an empty leaf list")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    /// levels[0] holds the leaves, the last level holds the root only.
    levels: Vec<Vec<HashType>>,
}

impl MerkleTree {
    /// Hashes every item into a leaf and builds the tree over them.
    pub fn from_raw<T: AsRef<[u8]>>(items: &[T]) -> Result<Self> {
        let leaves = items
            .iter()
            .map(|item| HashType::digest(item.as_ref()))
            .collect();
        Self::from_leaves(leaves)
    }

    /// Builds the tree over already hashed leaves.
    pub fn from_leaves(leaves: Vec<HashType>) -> Result<Self> {
        if leaves.is_empty() {
            return Err(MerkleError::Empty);
        }

        let mut levels = vec![leaves];
        while levels[levels.len() - 1].len() > 1 {
            let next = levels[levels.len() - 1]
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect::<Vec<_>>();
            levels.push(next);
        }
        Ok(Self { levels })
    }

    pub fn root(&self) -> HashType {
        self.levels[self.levels.len() - 1][0]
    }

    pub fn leaves(&self) -> &[HashType] {
        &self.levels[0]
    }

    /// Internal nodes bottom-up, root last. A tree with a single leaf has no internal nodes.
    pub fn internal_nodes(&self) -> impl Iterator<Item = &HashType> {
        self.levels.iter().skip(1).flatten()
    }

    /// Rebuilds the tree from `leaves` and compares its root with `claimed_root`.
    pub fn verify(leaves: &[HashType], claimed_root: &HashType) -> bool {
        match Self::from_leaves(leaves.to_vec()) {
            Ok(tree) => tree.root() == *claimed_root,
            Err(err) => {
                log::trace!("Merkle verification failed: {err}");
                false
            }
        }
    }
}

fn hash_pair(left: &HashType, right: &HashType) -> HashType {
    let mut bytes = Vec::with_capacity(64);
    bytes.extend_from_slice(left.as_ref());
    bytes.extend_from_slice(right.as_ref());
    blake2_256(&bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<HashType> {
        (0..n).map(|i| HashType::digest(&[i])).collect()
    }

    #[test]
    fn test_root_is_deterministic() {
        let first = MerkleTree::from_leaves(leaves(7)).unwrap();
        let second = MerkleTree::from_leaves(leaves(7)).unwrap();
        assert_eq!(first.root(), second.root());
    }

    #[test]
    fn test_permuting_leaves_changes_root() {
        let original = leaves(4);
        let mut permuted = original.clone();
        permuted.swap(0, 3);

        let root = MerkleTree::from_leaves(original.clone()).unwrap().root();
        let permuted_root = MerkleTree::from_leaves(permuted.clone()).unwrap().root();
        assert_ne!(root, permuted_root);

        //Restoring the order restores the root
        permuted.swap(0, 3);
        assert_eq!(MerkleTree::from_leaves(permuted).unwrap().root(), root);
    }

    #[test]
    fn test_single_leaf_is_root() {
        let leaves = leaves(1);
        let tree = MerkleTree::from_leaves(leaves.clone()).unwrap();
        assert_eq!(tree.root(), leaves[0]);
        assert_eq!(tree.internal_nodes().count(), 0);
    }

    #[test]
    fn test_odd_node_carried_up() {
        let l = leaves(3);
        let tree = MerkleTree::from_leaves(l.clone()).unwrap();

        let expected = hash_pair(&hash_pair(&l[0], &l[1]), &l[2]);
        assert_eq!(tree.root(), expected);
        assert_eq!(tree.internal_nodes().count(), 3);
    }

    #[test]
    fn test_from_raw_hashes_items() {
        let items = vec![b"tx1".to_vec(), b"tx2".to_vec()];
        let tree = MerkleTree::from_raw(&items).unwrap();

        let expected = hash_pair(&HashType::digest(b"tx1"), &HashType::digest(b"tx2"));
        assert_eq!(tree.root(), expected);
        assert_eq!(tree.leaves().len(), 2);
    }

    #[test]
    fn test_empty_is_rejected() {
        assert_eq!(MerkleTree::from_leaves(vec![]), Err(MerkleError::Empty));
        assert!(!MerkleTree::verify(&[], &HashType::ZERO));
    }

    #[test]
    fn test_verify() {
        let l = leaves(5);
        let root = MerkleTree::from_leaves(l.clone()).unwrap().root();

        assert!(MerkleTree::verify(&l, &root));
        assert!(!MerkleTree::verify(&l[..4], &root));
        assert!(!MerkleTree::verify(&l, &HashType::digest(b"other")));
    }
}
