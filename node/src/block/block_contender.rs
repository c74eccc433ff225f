use std::collections::{BTreeMap, HashSet};

use crate::block::group::{ContenderRejection, SubBlockGroup};
use crate::block::types::block::SubBlock;
use crate::block::types::contender::SubBlockContender;
use crate::core::context::NodeContext;
use crate::crypto::NodeId;
use crate::network::message::FailedBlockNotification;
use crate::storage::Result;
use crate::utilities::hash::{blake2_256, HashType};

/// Collects contenders of every sub-block index of the next block.
pub struct BlockContender {
    ctx: NodeContext,
    /// Hash of the chain tip, the next block builds on it.
    curr_block_hash: HashType,
    sb_groups: BTreeMap<u32, SubBlockGroup>,
    /// Input hashes of the previous height, contenders carrying them are replays.
    old_input_hashes: HashSet<HashType>,
    accepted_any: bool,
    committed: bool,
}

impl BlockContender {
    pub fn new(ctx: NodeContext) -> Result<Self> {
        let curr_block_hash = ctx.storage.lock().get_latest_block()?.block_hash;
        Ok(Self {
            ctx,
            curr_block_hash,
            sb_groups: BTreeMap::new(),
            old_input_hashes: HashSet::new(),
            accepted_any: false,
            committed: false,
        })
    }

    pub fn curr_block_hash(&self) -> HashType {
        self.curr_block_hash
    }

    pub fn has_contenders(&self) -> bool {
        self.accepted_any
    }

    /// Returns true only for the first contender accepted at this height.
    pub fn add_contender(&mut self, sender: &NodeId, contender: SubBlockContender) -> bool {
        if let Err(rejection) = self.precheck(&contender) {
            log::debug!("Rejected contender from {sender}: {rejection}");
            return false;
        }

        let sb_index = contender.sb_index;
        let curr_block_hash = self.curr_block_hash;
        let sub_blocks_per_block = self.ctx.sub_blocks_per_block();
        let roster = self.ctx.roster.clone();
        let group = self.sb_groups.entry(sb_index).or_insert_with(|| {
            SubBlockGroup::new(sb_index, curr_block_hash, sub_blocks_per_block, roster)
        });

        let accepted = group.add_contender(sender, contender);
        if group.total_votes() == 0 {
            //Don't keep groups nobody voted in, they would count towards the block
            self.sb_groups.remove(&sb_index);
        }

        if accepted && !self.accepted_any {
            self.accepted_any = true;
            return true;
        }
        false
    }

    fn precheck(
        &self,
        contender: &SubBlockContender,
    ) -> std::result::Result<(), ContenderRejection> {
        if self.committed {
            return Err(ContenderRejection::AlreadyCommitted);
        }
        if self.old_input_hashes.contains(&contender.input_hash) {
            return Err(ContenderRejection::ReplayedInput(contender.input_hash));
        }
        let count = self.ctx.sub_blocks_per_block();
        if contender.sb_index >= count {
            return Err(ContenderRejection::IndexOutOfRange {
                index: contender.sb_index,
                count,
            });
        }
        Ok(())
    }

    pub fn is_consensus_reached(&self) -> bool {
        self.sb_groups.len() == self.ctx.sub_blocks_per_block() as usize
            && self.sb_groups.values().all(SubBlockGroup::is_consensus_reached)
    }

    pub fn is_consensus_possible(&self) -> bool {
        self.sb_groups.values().all(SubBlockGroup::is_consensus_possible)
    }

    /// Finalized sub-blocks in index order.
    ///
    /// # Panics
    ///
    /// Panics when the number of finalized groups doesn't match the block layout.
    pub fn get_finalized_block(&self) -> Vec<SubBlock> {
        let expected = self.ctx.sub_blocks_per_block() as usize;
        let sub_blocks = self
            .sb_groups
            .values()
            .filter(|group| group.is_consensus_reached())
            .map(SubBlockGroup::get_finalized_subblock)
            .collect::<Vec<_>>();
        assert_eq!(
            sub_blocks.len(),
            expected,
            "Finalized {} sub-blocks, block has {expected}, this is a bug",
            sub_blocks.len()
        );
        sub_blocks
    }

    /// Block can't take any more contenders, it is waiting for [BlockContender::reset].
    pub fn mark_committed(&mut self) {
        self.committed = true;
    }

    /// Prepares for the next height: remembers this height's input hashes, drops all groups
    /// and re-reads the chain tip.
    pub fn reset(&mut self) -> Result<()> {
        self.old_input_hashes = self
            .sb_groups
            .values()
            .flat_map(SubBlockGroup::input_hashes)
            .collect();
        self.sb_groups.clear();
        self.accepted_any = false;
        self.committed = false;
        self.curr_block_hash = self.ctx.storage.lock().get_latest_block()?.block_hash;
        log::debug!(
            "Block contender reset, building on {}, {} old input hashes",
            self.curr_block_hash,
            self.old_input_hashes.len()
        );
        Ok(())
    }

    /// Describes the abandoned height so that delegates can drop its inputs.
    pub fn failed_block_notification(&self, block_num: u64) -> FailedBlockNotification {
        let first_sb_idx = self.sb_groups.keys().next().copied().unwrap_or_default();
        let input_hashes = self
            .sb_groups
            .values()
            .map(|group| group.input_hashes().into_iter().collect::<Vec<_>>())
            .collect::<Vec<_>>();

        let mut bytes = vec![];
        for hash in input_hashes.iter().flatten() {
            bytes.extend_from_slice(hash.as_ref());
        }
        bytes.extend_from_slice(self.curr_block_hash.as_ref());

        FailedBlockNotification {
            prev_block_hash: self.curr_block_hash,
            block_hash: blake2_256(&bytes).into(),
            block_num,
            first_sb_idx,
            input_hashes,
        }
    }
}
