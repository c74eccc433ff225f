//! Persisted chain state.
//!
//! Durable backends are provided by the embedding node. This crate only needs the
//! [ChainStorage] operations and ships [MemoryStorage] for tests and ephemeral nodes.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::block::types::block::BlockData;
use crate::utilities::hash::HashType;

pub(crate) mod memory;

pub use memory::MemoryStorage;

pub(crate) type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Block {0} already exists")]
    DuplicateBlock(HashType),
    #[error("Block number {actual} doesn't extend the chain tip {latest}")]
    NonSequential { latest: u64, actual: u64 },
    #[error("Block {block_hash} doesn't link to the chain tip {tip}")]
    BrokenLink {
        block_hash: HashType,
        tip: HashType,
    },
    #[error("StorageError::GeneralError: {0}")]
    General(#[from] anyhow::Error),
}

/// Storage is shared between components of a single node.
pub type SharedStorage = Arc<Mutex<Box<dyn ChainStorage + Send>>>;

pub fn shared<S: ChainStorage + Send + 'static>(storage: S) -> SharedStorage {
    Arc::new(Mutex::new(Box::new(storage)))
}

pub trait ChainStorage {
    /// Appends `block` to the chain. Only the block directly following the tip is accepted.
    fn store_block(&mut self, block: &BlockData) -> Result<()>;

    fn get_block_by_num(&self, block_num: u64) -> Result<Option<BlockData>>;

    fn get_block_by_hash(&self, block_hash: &HashType) -> Result<Option<BlockData>>;

    fn get_block_num_by_hash(&self, block_hash: &HashType) -> Result<Option<u64>>;

    /// The chain tip. There is always at least the genesis block.
    fn get_latest_block(&self) -> Result<BlockData>;

    fn get_latest_num(&self) -> Result<u64> {
        Ok(self.get_latest_block()?.block_num)
    }
}
