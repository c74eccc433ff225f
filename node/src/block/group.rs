//! Vote tally for a single sub-block index.
//!
//! Every delegate sends one [SubBlockContender] per sub-block index. Contenders are kept in
//! an arena and referred to by handle. `sender_to_contender` guarantees one live contender
//! per sender and `votes` groups live handles by result hash.
//!
//! States:
//! - `Collecting`: neither outcome is decided yet.
//! - `QuorumReached`: a result hash has a majority of delegate votes and every leaf has a
//!   transaction. Terminal.
//! - `Impossible`: no result hash can reach majority anymore, even if all remaining
//!   delegates vote for it. Terminal.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::block::types::block::SubBlock;
use crate::block::types::contender::SubBlockContender;
use crate::block::types::transaction::Transaction;
use crate::crypto::NodeId;
use crate::network::roster::Roster;
use crate::utilities::hash::HashType;
use crate::utilities::merkle::MerkleTree;

type ContenderHandle = usize;

/// Why a contender wasn't counted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContenderRejection {
    #[error("Sender {0} is not a delegate")]
    UnknownSender(NodeId),
    #[error("Signer {signer} is not the sender {sender}")]
    SignerMismatch { sender: NodeId, signer: NodeId },
    #[error("Sub-block index {actual} doesn't belong to group {expected}")]
    WrongIndex { expected: u32, actual: u32 },
    #[error("Invalid signature over result hash {0}")]
    InvalidSignature(HashType),
    #[error("Contender built on {actual}, current block is {expected}")]
    StalePrevBlockHash {
        expected: HashType,
        actual: HashType,
    },
    #[error("Merkle leaves don't hash to result hash {0}")]
    MerkleRootMismatch(HashType),
    #[error("Empty contender claims result hash {result_hash}, input hash is {input_hash}")]
    EmptyResultMismatch {
        input_hash: HashType,
        result_hash: HashType,
    },
    #[error("Transaction {0} is not in merkle leaves")]
    UnknownTransaction(HashType),
    #[error("Sub-block index {index} is out of range, block has {count} sub-blocks")]
    IndexOutOfRange { index: u32, count: u32 },
    #[error("Input hash {0} was already finalized in the previous block")]
    ReplayedInput(HashType),
    #[error("Block was already committed")]
    AlreadyCommitted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubBlockGroupState {
    Collecting,
    QuorumReached,
    Impossible,
}

pub struct SubBlockGroup {
    sb_index: u32,
    /// Expected `prev_block_hash` of every contender.
    curr_block_hash: HashType,
    sub_blocks_per_block: u32,
    roster: Arc<Roster>,
    /// Arena of contenders, replaced contenders leave `None` behind.
    contenders: Vec<Option<SubBlockContender>>,
    sender_to_contender: HashMap<NodeId, ContenderHandle>,
    votes: HashMap<HashType, BTreeSet<ContenderHandle>>,
    best_result_hash: Option<HashType>,
    transactions_by_hash: HashMap<HashType, Transaction>,
    state: SubBlockGroupState,
}

impl SubBlockGroup {
    pub fn new(
        sb_index: u32,
        curr_block_hash: HashType,
        sub_blocks_per_block: u32,
        roster: Arc<Roster>,
    ) -> Self {
        Self {
            sb_index,
            curr_block_hash,
            sub_blocks_per_block,
            roster,
            contenders: vec![],
            sender_to_contender: HashMap::new(),
            votes: HashMap::new(),
            best_result_hash: None,
            transactions_by_hash: HashMap::new(),
            state: SubBlockGroupState::Collecting,
        }
    }

    pub fn sb_index(&self) -> u32 {
        self.sb_index
    }

    pub fn state(&self) -> SubBlockGroupState {
        self.state
    }

    pub fn best_result_hash(&self) -> Option<HashType> {
        self.best_result_hash
    }

    pub fn votes_for(&self, result_hash: &HashType) -> usize {
        self.votes.get(result_hash).map_or(0, BTreeSet::len)
    }

    /// Number of distinct senders with a live contender.
    pub fn total_votes(&self) -> usize {
        self.sender_to_contender.len()
    }

    /// Distinct input hashes of the live contenders.
    pub fn input_hashes(&self) -> BTreeSet<HashType> {
        self.live_contenders().map(|c| c.input_hash).collect()
    }

    /// Counts the contender unless it fails verification. A later contender from the same
    /// sender replaces the earlier one. Returns whether the contender was counted.
    pub fn add_contender(&mut self, sender: &NodeId, contender: SubBlockContender) -> bool {
        if self.state != SubBlockGroupState::Collecting {
            log::trace!(
                "Sub-block group {} is {:?}, ignoring contender from {sender}",
                self.sb_index,
                self.state
            );
            return false;
        }

        if let Err(rejection) = self.check_contender(sender, &contender) {
            log::debug!(
                "Rejected contender from {sender} for sub-block {}: {rejection}",
                self.sb_index
            );
            return false;
        }

        if let Some(previous) = self.sender_to_contender.remove(sender) {
            self.remove_vote(previous);
        }

        let result_hash = contender.result_hash;
        for tx in &contender.transactions {
            self.transactions_by_hash
                .entry(tx.hash())
                .or_insert_with(|| tx.clone());
        }

        let handle = self.contenders.len();
        self.contenders.push(Some(contender));
        self.sender_to_contender.insert(*sender, handle);
        self.votes.entry(result_hash).or_default().insert(handle);
        self.update_best_result_hash();

        log::debug!(
            "Sub-block {} counted vote from {sender} for {result_hash}: {}/{} (quorum {})",
            self.sb_index,
            self.votes_for(&result_hash),
            self.roster.delegate_population(),
            self.roster.delegate_quorum()
        );

        self.update_state();
        true
    }

    pub fn verify_contender(&self, sender: &NodeId, contender: &SubBlockContender) -> bool {
        self.check_contender(sender, contender).is_ok()
    }

    /// Runs every contender check, in order, and reports the first failure.
    pub fn check_contender(
        &self,
        sender: &NodeId,
        contender: &SubBlockContender,
    ) -> Result<(), ContenderRejection> {
        if !self.roster.is_delegate(sender) {
            return Err(ContenderRejection::UnknownSender(*sender));
        }
        if contender.signer() != sender {
            return Err(ContenderRejection::SignerMismatch {
                sender: *sender,
                signer: *contender.signer(),
            });
        }
        if contender.sb_index != self.sb_index {
            return Err(ContenderRejection::WrongIndex {
                expected: self.sb_index,
                actual: contender.sb_index,
            });
        }
        if !contender.signature.verify(&contender.result_hash) {
            return Err(ContenderRejection::InvalidSignature(contender.result_hash));
        }
        if contender.prev_block_hash != self.curr_block_hash {
            return Err(ContenderRejection::StalePrevBlockHash {
                expected: self.curr_block_hash,
                actual: contender.prev_block_hash,
            });
        }
        if contender.merkle_leaves.is_empty() {
            if contender.result_hash != contender.input_hash {
                return Err(ContenderRejection::EmptyResultMismatch {
                    input_hash: contender.input_hash,
                    result_hash: contender.result_hash,
                });
            }
        } else if !MerkleTree::verify(&contender.merkle_leaves, &contender.result_hash) {
            return Err(ContenderRejection::MerkleRootMismatch(contender.result_hash));
        }
        for tx in &contender.transactions {
            let tx_hash = tx.hash();
            if !contender.merkle_leaves.contains(&tx_hash) {
                return Err(ContenderRejection::UnknownTransaction(tx_hash));
            }
        }
        if contender.sb_index >= self.sub_blocks_per_block {
            return Err(ContenderRejection::IndexOutOfRange {
                index: contender.sb_index,
                count: self.sub_blocks_per_block,
            });
        }
        Ok(())
    }

    pub fn is_consensus_reached(&self) -> bool {
        self.state == SubBlockGroupState::QuorumReached
    }

    pub fn is_consensus_possible(&self) -> bool {
        self.state != SubBlockGroupState::Impossible
    }

    /// The agreed sub-block.
    ///
    /// # Panics
    ///
    /// Panics if consensus isn't reached or a leaf has no transaction, both are bugs.
    pub fn get_finalized_subblock(&self) -> SubBlock {
        assert!(
            self.is_consensus_reached(),
            "Sub-block {} finalized without consensus, this is a bug",
            self.sb_index
        );
        let merkle_root = self
            .best_result_hash
            .expect("Best result hash should be present when consensus is reached");

        let leader = self
            .leader(&merkle_root)
            .expect("Quorum result hash should have a contender proving it");

        let mut signatures = self
            .backing(&merkle_root)
            .map(|c| c.signature.clone())
            .collect::<Vec<_>>();
        signatures.sort_by(|a, b| a.signer.cmp(&b.signer));

        let transactions = leader
            .merkle_leaves
            .iter()
            .map(|leaf| {
                self.transactions_by_hash
                    .get(leaf)
                    .cloned()
                    .unwrap_or_else(|| {
                        panic!(
                            "Leaf {leaf} of sub-block {} has no transaction, this is a bug",
                            self.sb_index
                        )
                    })
            })
            .collect();

        SubBlock {
            sb_index: self.sb_index,
            merkle_root,
            input_hash: leader.input_hash,
            merkle_leaves: leader.merkle_leaves.clone(),
            signatures,
            transactions,
        }
    }

    fn live_contenders(&self) -> impl Iterator<Item = &SubBlockContender> {
        self.sender_to_contender
            .values()
            .filter_map(|handle| self.contenders[*handle].as_ref())
    }

    fn backing<'a>(
        &'a self,
        result_hash: &HashType,
    ) -> impl Iterator<Item = &'a SubBlockContender> + 'a {
        self.votes
            .get(result_hash)
            .into_iter()
            .flatten()
            .filter_map(move |handle| self.contenders[*handle].as_ref())
    }

    /// Contender whose leaves are used for `result_hash`. A contender with leaves hashing to
    /// it wins over an empty one.
    fn leader(&self, result_hash: &HashType) -> Option<&SubBlockContender> {
        let proves = |c: &&SubBlockContender| {
            !c.merkle_leaves.is_empty() && MerkleTree::verify(&c.merkle_leaves, result_hash)
        };
        self.backing(result_hash).find(proves).or_else(|| {
            self.backing(result_hash)
                .find(|c| c.merkle_leaves.is_empty() && c.input_hash == *result_hash)
        })
    }

    fn remove_vote(&mut self, handle: ContenderHandle) {
        if let Some(contender) = self.contenders[handle].take() {
            if let Some(handles) = self.votes.get_mut(&contender.result_hash) {
                handles.remove(&handle);
                if handles.is_empty() {
                    self.votes.remove(&contender.result_hash);
                }
            }
        }
    }

    /// Leader keeps its place on a tie, otherwise the smallest hash with most votes wins.
    fn update_best_result_hash(&mut self) {
        let current = self
            .best_result_hash
            .map_or(0, |hash| self.votes_for(&hash));
        let best = self
            .votes
            .iter()
            .map(|(hash, handles)| (handles.len(), std::cmp::Reverse(*hash)))
            .max()
            .map(|(count, std::cmp::Reverse(hash))| (count, hash));

        match best {
            Some((count, hash)) if count > current => self.best_result_hash = Some(hash),
            Some(_) if current > 0 => {}
            Some((_, hash)) => self.best_result_hash = Some(hash),
            None => self.best_result_hash = None,
        }
    }

    fn quorum_reached(&self) -> bool {
        let Some(best) = self.best_result_hash else {
            return false;
        };
        if self.votes_for(&best) < self.roster.delegate_quorum() {
            return false;
        }

        //All leaves need a transaction to assemble the sub-block
        self.leader(&best).map_or(false, |leader| {
            leader
                .merkle_leaves
                .iter()
                .all(|leaf| self.transactions_by_hash.contains_key(leaf))
        })
    }

    fn quorum_possible(&self) -> bool {
        let population = self.roster.delegate_population();
        let remaining = population.saturating_sub(self.total_votes());
        let leading = self.votes.values().map(BTreeSet::len).max().unwrap_or(0);
        leading + remaining >= self.roster.delegate_quorum()
    }

    fn update_state(&mut self) {
        if self.quorum_reached() {
            log::info!(
                "Sub-block {} reached consensus on {:?}",
                self.sb_index,
                self.best_result_hash
            );
            self.state = SubBlockGroupState::QuorumReached;
        } else if !self.quorum_possible() {
            log::warn!(
                "Sub-block {} can't reach consensus anymore, votes: {:?}",
                self.sb_index,
                self.votes
                    .iter()
                    .map(|(hash, handles)| (hash.to_string(), handles.len()))
                    .collect::<Vec<_>>()
            );
            self.state = SubBlockGroupState::Impossible;
        }
    }
}
