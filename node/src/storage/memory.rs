use std::collections::HashMap;

use log::trace;

use crate::block::types::block::BlockData;
use crate::storage::{ChainStorage, Result, StorageError};
use crate::utilities::hash::HashType;

pub struct MemoryStorage {
    /// Blocks indexed by block number, genesis first.
    blocks: Vec<BlockData>,
    block_nums: HashMap<HashType, u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        let genesis = BlockData::genesis();
        let mut block_nums = HashMap::new();
        block_nums.insert(genesis.block_hash, genesis.block_num);
        Self {
            blocks: vec![genesis],
            block_nums,
        }
    }

    fn tip(&self) -> &BlockData {
        self.blocks
            .last()
            .expect("Genesis block should always be present")
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStorage for MemoryStorage {
    fn store_block(&mut self, block: &BlockData) -> Result<()> {
        log::debug!("Storing block: {block}");

        if self.block_nums.contains_key(&block.block_hash) {
            return Err(StorageError::DuplicateBlock(block.block_hash));
        }

        let tip = self.tip();
        if block.block_num != tip.block_num + 1 {
            return Err(StorageError::NonSequential {
                latest: tip.block_num,
                actual: block.block_num,
            });
        }
        if block.prev_block_hash != tip.block_hash {
            return Err(StorageError::BrokenLink {
                block_hash: block.block_hash,
                tip: tip.block_hash,
            });
        }

        self.block_nums.insert(block.block_hash, block.block_num);
        self.blocks.push(block.clone());
        Ok(())
    }

    fn get_block_by_num(&self, block_num: u64) -> Result<Option<BlockData>> {
        trace!("Getting block by number: {block_num}");
        let block = usize::try_from(block_num)
            .ok()
            .and_then(|idx| self.blocks.get(idx))
            .cloned();
        Ok(block)
    }

    fn get_block_by_hash(&self, block_hash: &HashType) -> Result<Option<BlockData>> {
        trace!("Getting block by hash: {block_hash}");
        match self.block_nums.get(block_hash) {
            Some(num) => self.get_block_by_num(*num),
            None => Ok(None),
        }
    }

    fn get_block_num_by_hash(&self, block_hash: &HashType) -> Result<Option<u64>> {
        Ok(self.block_nums.get(block_hash).copied())
    }

    fn get_latest_block(&self) -> Result<BlockData> {
        Ok(self.tip().clone())
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use crate::testing;

    use super::*;

    #[test]
    fn test_starts_with_genesis() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_latest_num().unwrap(), 0);
        assert_eq!(
            storage.get_block_num_by_hash(&HashType::ZERO).unwrap(),
            Some(0)
        );
    }

    #[test]
    fn test_store_and_query() {
        let blocks = testing::chain(2);
        let mut storage = MemoryStorage::new();
        storage.store_block(&blocks[0]).unwrap();
        storage.store_block(&blocks[1]).unwrap();

        assert_eq!(storage.get_latest_block().unwrap(), blocks[1]);
        assert_eq!(storage.get_block_by_num(1).unwrap(), Some(blocks[0].clone()));
        assert_eq!(
            storage.get_block_by_hash(&blocks[1].block_hash).unwrap(),
            Some(blocks[1].clone())
        );
        assert_eq!(storage.get_block_by_num(3).unwrap(), None);
    }

    #[test]
    fn test_reject_duplicate() {
        let blocks = testing::chain(1);
        let mut storage = MemoryStorage::new();
        storage.store_block(&blocks[0]).unwrap();

        assert_matches!(
            storage.store_block(&blocks[0]),
            Err(StorageError::DuplicateBlock(_))
        );
    }

    #[test]
    fn test_reject_gap() {
        let blocks = testing::chain(2);
        let mut storage = MemoryStorage::new();

        assert_matches!(
            storage.store_block(&blocks[1]),
            Err(StorageError::NonSequential { latest: 0, actual: 2 })
        );
    }

    #[test]
    fn test_reject_broken_link() {
        let blocks = testing::chain(1);
        let mut block = blocks[0].clone();
        block.prev_block_hash = HashType::digest(b"fork");
        block.block_hash = HashType::digest(b"fork block");

        let mut storage = MemoryStorage::new();
        assert_matches!(
            storage.store_block(&block),
            Err(StorageError::BrokenLink { .. })
        );
    }
}
