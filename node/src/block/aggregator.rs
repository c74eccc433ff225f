use std::pin::Pin;
use std::task;
use std::task::Poll::{Pending, Ready};
use std::time::Duration;

use futures::{FutureExt, Stream};
use futures_timer::Delay;
use thiserror::Error;

use crate::block::block_contender::BlockContender;
use crate::block::types::block::BlockData;
use crate::block::types::contender::SubBlockContender;
use crate::core::context::NodeContext;
use crate::crypto::NodeId;
use crate::network::message::{Action, Message, NewBlockNotification};
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Block couldn't be stored: {0}")]
    Storage(#[from] StorageError),
    #[error("AggregatorError::GeneralError: {0}")]
    General(#[from] anyhow::Error),
}

pub(crate) type Result<T> = std::result::Result<T, AggregatorError>;

/// Masternode side of block production.
///
/// Feeds contenders into a [BlockContender] for the next height and commits the block as
/// soon as every sub-block is agreed. A height is abandoned with a
/// [Message::FailedBlockNotification] when agreement became impossible or the block timeout
/// fired.
pub struct BlockAggregator {
    ctx: NodeContext,
    contender: BlockContender,
    block_timeout: Duration,
    /// Armed by the first contender of a height.
    timeout: Option<Delay>,
}

impl BlockAggregator {
    pub fn new(ctx: NodeContext) -> Result<Self> {
        let block_timeout = Duration::from_millis(ctx.config.block.block_timeout_ms);
        let contender = BlockContender::new(ctx.clone())?;
        Ok(Self {
            ctx,
            contender,
            block_timeout,
            timeout: None,
        })
    }

    pub fn contender(&self) -> &BlockContender {
        &self.contender
    }

    pub fn is_timeout_armed(&self) -> bool {
        self.timeout.is_some()
    }

    pub fn on_sub_block_contender(
        &mut self,
        sender: &NodeId,
        contender: SubBlockContender,
    ) -> Result<Vec<Action>> {
        log::trace!("Contender from {sender}: {contender}");
        if self.contender.add_contender(sender, contender) {
            log::debug!(
                "First contender for block on top of {}, block timeout {:?}",
                self.contender.curr_block_hash(),
                self.block_timeout
            );
            self.timeout = Some(Delay::new(self.block_timeout));
        }

        if self.contender.is_consensus_reached() {
            return self.commit();
        }
        if !self.contender.is_consensus_possible() {
            log::error!(
                "Block on top of {} can't reach consensus",
                self.contender.curr_block_hash()
            );
            return self.fail();
        }
        Ok(vec![])
    }

    /// Block timeout fired before consensus.
    pub fn on_timeout(&mut self) -> Result<Vec<Action>> {
        self.timeout = None;
        if !self.contender.has_contenders() {
            return Ok(vec![]);
        }
        log::error!(
            "Block on top of {} timed out after {:?}",
            self.contender.curr_block_hash(),
            self.block_timeout
        );
        self.fail()
    }

    /// Chain tip moved without this aggregator, for example through catchup.
    pub fn on_chain_advanced(&mut self) -> Result<()> {
        let tip = self.ctx.storage.lock().get_latest_block()?.block_hash;
        if tip != self.contender.curr_block_hash() {
            log::info!(
                "Chain advanced from {} to {tip}, dropping pending block",
                self.contender.curr_block_hash()
            );
            self.timeout = None;
            self.contender.reset()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<Vec<Action>> {
        self.contender.mark_committed();
        let sub_blocks = self.contender.get_finalized_block();

        let block = {
            let mut storage = self.ctx.storage.lock();
            let block_num = storage.get_latest_num()? + 1;
            let block = BlockData::new(
                block_num,
                self.contender.curr_block_hash(),
                self.ctx.roster.masternodes().to_vec(),
                sub_blocks,
            );
            storage.store_block(&block)?;
            block
        };
        log::info!("Committed block {block}");

        self.timeout = None;
        self.contender.reset()?;

        let notification = NewBlockNotification {
            block_hash: block.block_hash,
            block_num: block.block_num,
            block_owners: block.block_owners.clone(),
        };
        Ok(vec![
            Action::BlockApplied {
                block_num: block.block_num,
                block_hash: block.block_hash,
            },
            Action::broadcast(Message::NewBlockNotification(notification)),
        ])
    }

    fn fail(&mut self) -> Result<Vec<Action>> {
        let block_num = self.ctx.storage.lock().get_latest_num()? + 1;
        let notification = self.contender.failed_block_notification(block_num);
        log::warn!(
            "Abandoning block {block_num}: {}",
            crate::logging::pretty_json(&notification)
        );

        self.timeout = None;
        self.contender.reset()?;
        Ok(vec![Action::broadcast(Message::FailedBlockNotification(
            notification,
        ))])
    }
}

//Yields once per block timeout
impl Stream for BlockAggregator {
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
