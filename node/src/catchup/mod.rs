//! Brings the local chain up to the network's tip.
//!
//! A round starts by broadcasting a [BlockIndexRequest] with the local tip hash. Masternodes
//! reply with the blocks they have after it. Once enough distinct masternodes answered, the
//! node fetches the missing blocks one block number at a time from their owners and applies
//! them strictly in order. Replies for later blocks are buffered until the gap closes.
//!
//! ```text
//! Idle -> IndexRequested -> (quorum of index replies) -> Fetching -> (tip == target) -> Idle
//! ```
//!
//! Timeouts re-send the pending request. Consecutive timeouts without progress are bounded
//! by `catchup.max_retries`, after that catchup fails with [CatchupError::RetriesExhausted].
//!
//! Masternodes also answer other nodes' index and block data requests, independent of
//! their own catchup state.

use std::collections::{BTreeMap, HashSet};
use std::pin::Pin;
use std::task;
use std::task::Poll::{Pending, Ready};
use std::time::Duration;

use futures::{FutureExt, Stream};
use futures_timer::Delay;
use thiserror::Error;

use crate::block::types::block::BlockData;
use crate::core::context::NodeContext;
use crate::crypto::NodeId;
use crate::network::message::{
    Action, BlockDataRequest, BlockIndexEntry, BlockIndexReply, BlockIndexRequest, Message,
    NewBlockNotification,
};
use crate::storage::StorageError;
use crate::utilities::hash::HashType;

#[derive(Error, Debug)]
pub enum CatchupError {
    #[error("Catchup gave up after {0} consecutive timeouts")]
    RetriesExhausted(u32),
    #[error("Catchup storage failure: {0}")]
    Storage(#[from] StorageError),
}

pub(crate) type Result<T> = std::result::Result<T, CatchupError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchupState {
    Idle,
    IndexRequested,
    Fetching,
}

pub struct CatchupManager {
    ctx: NodeContext,
    state: CatchupState,
    curr_hash: HashType,
    curr_num: u64,
    /// Highest block number known to exist in the network.
    target_blk_num: u64,
    /// Next block to apply while fetching.
    awaited_blk_num: Option<u64>,
    /// Known blocks after the local tip, by block number.
    block_delta_list: BTreeMap<u64, BlockIndexEntry>,
    /// Received blocks waiting for their predecessors.
    rcv_block_dict: BTreeMap<u64, BlockData>,
    /// Masternodes which answered the current index round.
    node_idx_reply_set: HashSet<NodeId>,
    catchup_timeout: Duration,
    timeout: Option<Delay>,
    max_retries: u32,
    retries: u32,
}

impl CatchupManager {
    pub fn new(ctx: NodeContext) -> Result<Self> {
        let tip = ctx.storage.lock().get_latest_block()?;
        let catchup_timeout = Duration::from_millis(ctx.config.catchup.timeout_ms);
        let max_retries = ctx.config.catchup.max_retries;
        Ok(Self {
            ctx,
            state: CatchupState::Idle,
            curr_hash: tip.block_hash,
            curr_num: tip.block_num,
            target_blk_num: tip.block_num,
            awaited_blk_num: None,
            block_delta_list: BTreeMap::new(),
            rcv_block_dict: BTreeMap::new(),
            node_idx_reply_set: HashSet::new(),
            catchup_timeout,
            timeout: None,
            max_retries,
            retries: 0,
        })
    }

    pub fn state(&self) -> CatchupState {
        self.state
    }

    pub fn curr_num(&self) -> u64 {
        self.curr_num
    }

    pub fn curr_hash(&self) -> HashType {
        self.curr_hash
    }

    pub fn target_blk_num(&self) -> u64 {
        self.target_blk_num
    }

    pub fn awaited_blk_num(&self) -> Option<u64> {
        self.awaited_blk_num
    }

    pub fn is_catchup_done(&self) -> bool {
        self.state == CatchupState::Idle && self.curr_num >= self.target_blk_num
    }

    /// Starts a new index round from the local tip. A pending round is abandoned.
    pub fn run_catchup(&mut self) -> Result<Vec<Action>> {
        self.timeout = None;
        let tip = self.ctx.storage.lock().get_latest_block()?;
        self.curr_hash = tip.block_hash;
        self.curr_num = tip.block_num;
        self.target_blk_num = self.target_blk_num.max(self.curr_num);
        self.awaited_blk_num = None;
        self.node_idx_reply_set.clear();
        self.block_delta_list.clear();
        let curr_num = self.curr_num;
        self.rcv_block_dict.retain(|num, _| *num > curr_num);
        self.retries = 0;

        if self.catchup_quorum() == 0 {
            log::info!("No other masternodes, catchup done at block {}", self.curr_num);
            self.target_blk_num = self.curr_num;
            self.state = CatchupState::Idle;
            return Ok(vec![]);
        }

        log::info!(
            "Starting catchup from block {} ({}), quorum {}",
            self.curr_num,
            self.curr_hash,
            self.catchup_quorum()
        );
        self.state = CatchupState::IndexRequested;
        self.arm_timeout();
        Ok(vec![self.index_request()])
    }

    pub fn on_block_index_reply(&mut self, sender: &NodeId, reply: BlockIndexReply) -> Vec<Action> {
        if !self.ctx.roster.is_masternode(sender) {
            log::debug!("Ignoring block index reply from non-masternode {sender}");
            return vec![];
        }
        if self.state == CatchupState::Idle {
            log::trace!("Ignoring block index reply from {sender}, catchup is idle");
            return vec![];
        }
        if !self.node_idx_reply_set.insert(*sender) {
            log::trace!("Duplicate block index reply from {sender}");
            return vec![];
        }

        log::debug!(
            "Block index reply from {sender} with {} entries",
            reply.indices.len()
        );
        for entry in reply.indices {
            self.merge_index_entry(entry);
        }
        self.update_target();

        match self.state {
            CatchupState::IndexRequested
                if self.node_idx_reply_set.len() >= self.catchup_quorum() =>
            {
                self.timeout = None;
                self.retries = 0;
                log::info!(
                    "Block index quorum reached, local: {}, target: {}",
                    self.curr_num,
                    self.target_blk_num
                );
                if self.target_blk_num <= self.curr_num {
                    self.finish();
                    vec![]
                } else {
                    self.start_fetching()
                }
            }
            _ => vec![],
        }
    }

    pub fn on_block_data_reply(
        &mut self,
        sender: &NodeId,
        block: BlockData,
    ) -> Result<Vec<Action>> {
        if block.block_num <= self.curr_num {
            log::trace!(
                "Block {} from {sender} is already applied",
                block.block_num
            );
            return Ok(vec![]);
        }
        if self.state != CatchupState::Fetching {
            log::debug!(
                "Ignoring unsolicited block {} from {sender}",
                block.block_num
            );
            return Ok(vec![]);
        }
        if block.block_num > self.target_blk_num {
            log::debug!(
                "Block {} from {sender} is beyond target {}",
                block.block_num,
                self.target_blk_num
            );
            return Ok(vec![]);
        }
        if let Err(err) = block.verify() {
            log::warn!("Invalid block {} from {sender}: {err}", block.block_num);
            return Ok(vec![]);
        }
        if let Some(entry) = self.block_delta_list.get(&block.block_num) {
            if entry.block_hash != block.block_hash {
                log::warn!(
                    "Block {} from {sender} has hash {}, index says {}",
                    block.block_num,
                    block.block_hash,
                    entry.block_hash
                );
                return Ok(vec![]);
            }
        }

        if Some(block.block_num) != self.awaited_blk_num {
            log::debug!(
                "Buffering block {} while waiting for {:?}",
                block.block_num,
                self.awaited_blk_num
            );
        }
        self.rcv_block_dict.insert(block.block_num, block);

        let mut actions = self.apply_buffered()?;
        if actions.is_empty() {
            return Ok(actions);
        }

        if self.curr_num >= self.target_blk_num {
            self.finish();
        } else {
            actions.extend(self.request_awaited());
        }
        Ok(actions)
    }

    pub fn on_new_block_notification(
        &mut self,
        sender: &NodeId,
        notification: NewBlockNotification,
    ) -> Result<Vec<Action>> {
        if !self.ctx.roster.is_masternode(sender) {
            log::debug!("Ignoring new block notification from non-masternode {sender}");
            return Ok(vec![]);
        }
        if notification.block_num <= self.curr_num {
            log::trace!(
                "New block {} from {sender} is already applied",
                notification.block_num
            );
            return Ok(vec![]);
        }
        if notification.block_num > self.target_blk_num.max(self.curr_num) + 1 {
            log::info!(
                "New block {} from {sender} is ahead of target {}, restarting catchup",
                notification.block_num,
                self.target_blk_num
            );
            return self.run_catchup();
        }

        self.merge_index_entry(BlockIndexEntry {
            block_num: notification.block_num,
            block_hash: notification.block_hash,
            block_owners: notification.block_owners,
        });
        self.update_target();

        if self.state == CatchupState::Idle && notification.block_num == self.curr_num + 1 {
            log::debug!(
                "Fetching new block {} directly from its owners",
                notification.block_num
            );
            return Ok(self.start_fetching());
        }
        Ok(vec![])
    }

    /// Pending request timed out.
    pub fn on_timeout(&mut self) -> Result<Vec<Action>> {
        self.timeout = None;
        if self.state == CatchupState::Idle {
            return Ok(vec![]);
        }

        self.retries += 1;
        if self.retries >= self.max_retries {
            log::error!(
                "Catchup stuck at block {} in {:?} after {} timeouts",
                self.curr_num,
                self.state,
                self.retries
            );
            return Err(CatchupError::RetriesExhausted(self.retries));
        }

        log::warn!(
            "Catchup timeout in {:?}, retry {}/{}",
            self.state,
            self.retries,
            self.max_retries
        );
        match self.state {
            CatchupState::IndexRequested => {
                self.arm_timeout();
                Ok(vec![self.index_request()])
            }
            CatchupState::Fetching => Ok(self.request_awaited()),
            CatchupState::Idle => Ok(vec![]),
        }
    }

    /// The node committed `block_num` itself.
    pub fn on_local_block_committed(
        &mut self,
        block_num: u64,
        block_hash: HashType,
    ) -> Vec<Action> {
        if block_num <= self.curr_num {
            return vec![];
        }
        if block_num != self.curr_num + 1 {
            log::warn!(
                "Local commit of block {block_num} skips blocks after {}",
                self.curr_num
            );
        }
        self.advance_to(block_num, block_hash);

        match self.state {
            CatchupState::Fetching if self.curr_num >= self.target_blk_num => {
                self.finish();
                vec![]
            }
            CatchupState::Fetching => self.request_awaited(),
            _ => {
                self.target_blk_num = self.target_blk_num.max(self.curr_num);
                vec![]
            }
        }
    }

    /// Answers with the blocks after the requester's tip.
    pub fn on_block_index_req(
        &self,
        requester: &NodeId,
        request: BlockIndexRequest,
    ) -> Result<Vec<Action>> {
        if !self.ctx.is_masternode() {
            return Ok(vec![]);
        }

        let storage = self.ctx.storage.lock();
        let Some(from) = storage.get_block_num_by_hash(&request.block_hash)? else {
            log::debug!(
                "Block index request from {requester} for unknown block {}",
                request.block_hash
            );
            return Ok(vec![]);
        };

        let latest = storage.get_latest_num()?;
        let mut indices = vec![];
        for block_num in from + 1..=latest {
            match storage.get_block_by_num(block_num)? {
                Some(block) => indices.push(BlockIndexEntry {
                    block_num,
                    block_hash: block.block_hash,
                    block_owners: block.block_owners,
                }),
                None => {
                    log::error!("Block {block_num} is missing below tip {latest}");
                    break;
                }
            }
        }

        log::debug!(
            "Replying to {requester} with {} index entries after block {from}",
            indices.len()
        );
        Ok(vec![Action::send(
            *requester,
            Message::BlockIndexReply(BlockIndexReply { indices }),
        )])
    }

    pub fn on_block_data_req(
        &self,
        requester: &NodeId,
        request: BlockDataRequest,
    ) -> Result<Vec<Action>> {
        if !self.ctx.is_masternode() {
            return Ok(vec![]);
        }
        match self.ctx.storage.lock().get_block_by_num(request.block_num)? {
            Some(block) => Ok(vec![Action::send(
                *requester,
                Message::BlockDataReply(Box::new(block)),
            )]),
            None => {
                log::debug!(
                    "Block data request from {requester} for unknown block {}",
                    request.block_num
                );
                Ok(vec![])
            }
        }
    }

    fn catchup_quorum(&self) -> usize {
        self.ctx.roster.catchup_quorum(&self.ctx.node_id)
    }

    fn index_request(&self) -> Action {
        Action::broadcast(Message::BlockIndexRequest(BlockIndexRequest {
            block_hash: self.curr_hash,
        }))
    }

    fn arm_timeout(&mut self) {
        self.timeout = Some(Delay::new(self.catchup_timeout));
    }

    fn merge_index_entry(&mut self, mut entry: BlockIndexEntry) {
        if entry.block_num <= self.curr_num {
            return;
        }
        let roster = &self.ctx.roster;
        entry.block_owners.retain(|owner| roster.is_masternode(owner));

        match self.block_delta_list.get_mut(&entry.block_num) {
            None => {
                self.block_delta_list.insert(entry.block_num, entry);
            }
            Some(existing) if existing.block_hash == entry.block_hash => {
                for owner in entry.block_owners {
                    if !existing.block_owners.contains(&owner) {
                        existing.block_owners.push(owner);
                    }
                }
            }
            Some(existing) => {
                log::warn!(
                    "Conflicting index entries for block {}: keeping {}, ignoring {}",
                    entry.block_num,
                    existing.block_hash,
                    entry.block_hash
                );
            }
        }
    }

    fn update_target(&mut self) {
        if let Some(highest) = self.block_delta_list.keys().next_back() {
            self.target_blk_num = self.target_blk_num.max(*highest);
        }
    }

    fn start_fetching(&mut self) -> Vec<Action> {
        self.state = CatchupState::Fetching;
        self.awaited_blk_num = Some(self.curr_num + 1);
        self.request_awaited()
    }

    /// Requests the awaited block from its owners, or from every other masternode when the
    /// owners aren't known.
    fn request_awaited(&mut self) -> Vec<Action> {
        let block_num = self.curr_num + 1;
        self.awaited_blk_num = Some(block_num);
        self.arm_timeout();

        let local = self.ctx.node_id;
        let owners = self
            .block_delta_list
            .get(&block_num)
            .map(|entry| {
                entry
                    .block_owners
                    .iter()
                    .filter(|owner| **owner != local)
                    .copied()
                    .collect::<Vec<_>>()
            })
            .filter(|owners| !owners.is_empty())
            .unwrap_or_else(|| self.ctx.roster.other_masternodes(&local).copied().collect());

        log::debug!("Requesting block {block_num} from {} nodes", owners.len());
        owners
            .into_iter()
            .map(|owner| {
                Action::send(
                    owner,
                    Message::BlockDataRequest(BlockDataRequest { block_num }),
                )
            })
            .collect()
    }

    /// Applies buffered blocks which extend the local tip.
    fn apply_buffered(&mut self) -> Result<Vec<Action>> {
        let mut actions = vec![];
        while let Some(block) = self.rcv_block_dict.remove(&(self.curr_num + 1)) {
            if block.prev_block_hash != self.curr_hash {
                log::warn!(
                    "Block {} doesn't link to local tip {}, dropping it",
                    block.block_num,
                    self.curr_hash
                );
                break;
            }

            self.ctx.storage.lock().store_block(&block)?;
            log::info!("Caught up block {block}");

            self.advance_to(block.block_num, block.block_hash);
            self.retries = 0;
            actions.push(Action::BlockApplied {
                block_num: block.block_num,
                block_hash: block.block_hash,
            });
        }
        Ok(actions)
    }

    fn advance_to(&mut self, block_num: u64, block_hash: HashType) {
        self.curr_num = block_num;
        self.curr_hash = block_hash;
        self.block_delta_list = self.block_delta_list.split_off(&(block_num + 1));
        self.rcv_block_dict = self.rcv_block_dict.split_off(&(block_num + 1));
    }

    fn finish(&mut self) {
        log::info!("Catchup done at block {} ({})", self.curr_num, self.curr_hash);
        self.timeout = None;
        self.retries = 0;
        self.awaited_blk_num = None;
        self.target_blk_num = self.curr_num;
        self.node_idx_reply_set.clear();
        self.state = CatchupState::Idle;
    }
}

//Yields once per catchup timeout
impl Stream for CatchupManager {
    type Item = ();

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context) -> task::Poll<Option<()>> {
        match self.timeout.as_mut() {
            Some(delay) => match delay.poll_unpin(cx) {
                Ready(()) => {
                    self.timeout = None;
                    Ready(Some(()))
                }
                Pending => Pending,
            },
            None => Pending,
        }
    }
}
