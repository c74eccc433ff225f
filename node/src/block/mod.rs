//! # Blocks
//!
//! A block is split into a fixed number of sub-blocks. Each sub-block index is agreed
//! independently: delegates execute a batch of transactions and send a signed
//! [types::contender::SubBlockContender] to every masternode. The result hash of a contender
//! is the Merkle root over its transaction hashes, so a masternode can check that the claimed
//! transactions really produce the voted hash.
//!
//! A masternode tallies contenders per sub-block index in a [group::SubBlockGroup]. An index is
//! agreed when `ceil(2/3 * delegates)` distinct delegates voted for the same result hash. The
//! [block_contender::BlockContender] collects the groups of one height and the
//! [aggregator::BlockAggregator] commits the block once every index is agreed.
//!
//! The block hash is `blake2_256(sub_block_roots_in_index_order ‖ prev_block_hash)`.

pub(crate) mod aggregator;
pub(crate) mod block_contender;
pub(crate) mod group;
pub(crate) mod types;

pub use aggregator::{AggregatorError, BlockAggregator};
pub use block_contender::BlockContender;
pub use group::{ContenderRejection, SubBlockGroup, SubBlockGroupState};
pub use types::block::{compute_block_hash, BlockData, BlockError, SubBlock};
pub use types::contender::SubBlockContender;
pub use types::transaction::Transaction;
