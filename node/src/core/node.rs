use anyhow::anyhow;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::block::aggregator::{AggregatorError, BlockAggregator};
use crate::catchup::{CatchupError, CatchupManager};
use crate::config::ConfigurationError;
use crate::core::context::NodeContext;
use crate::core::shutdown::{Handle, ShutdownManager};
use crate::crypto::NodeId;
use crate::network::message::{Action, Message};
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("NodeError::Catchup: {0}")]
    Catchup(#[from] CatchupError),
    #[error("NodeError::Aggregator: {0}")]
    Aggregator(#[from] AggregatorError),
    #[error("NodeError::Storage: {0}")]
    Storage(#[from] StorageError),
    #[error("NodeError::Configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("NodeError::GeneralError: {0}")]
    General(#[from] anyhow::Error),
}

pub(crate) type Result<T> = std::result::Result<T, NodeError>;

/// What the transport needs to talk to a running [Node].
#[derive(Clone)]
pub struct NodeHandle {
    /// Messages received from the network, with their authenticated sender.
    pub inbound: mpsc::UnboundedSender<(NodeId, Message)>,
    pub shutdown: Handle,
}

/// Consensus and catchup core of a single node.
///
/// All state changes happen inside [Node::handle_message] and the timeout handlers. They
/// return [Action]s which the node forwards to the outbound channel after the handler
/// finished.
pub struct Node {
    ctx: NodeContext,
    catchup: CatchupManager,
    /// Only masternodes aggregate blocks.
    aggregator: Option<BlockAggregator>,
    inbound: mpsc::UnboundedReceiver<(NodeId, Message)>,
    outbound: mpsc::UnboundedSender<Action>,
    shutdown_manager: ShutdownManager,
}

impl Node {
    pub fn new(
        ctx: NodeContext,
    ) -> Result<(Node, NodeHandle, mpsc::UnboundedReceiver<Action>)> {
        let catchup = CatchupManager::new(ctx.clone())?;
        let aggregator = if ctx.is_masternode() {
            Some(BlockAggregator::new(ctx.clone())?)
        } else {
            None
        };

        let (inbound_tx, inbound_rcv) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rcv) = mpsc::unbounded_channel();
        let (shutdown_manager, shutdown) = ShutdownManager::init();

        let node = Node {
            ctx,
            catchup,
            aggregator,
            inbound: inbound_rcv,
            outbound: outbound_tx,
            shutdown_manager,
        };
        let handle = NodeHandle {
            inbound: inbound_tx,
            shutdown,
        };
        Ok((node, handle, outbound_rcv))
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn catchup(&self) -> &CatchupManager {
        &self.catchup
    }

    /// Starts the first catchup round.
    pub fn start(&mut self) -> Result<()> {
        log::info!(
            "Starting {:?} {} at block {}",
            self.ctx.role(),
            self.ctx.node_id(),
            self.catchup.curr_num()
        );
        let actions = self.catchup.run_catchup()?;
        self.dispatch(actions)
    }

    pub async fn run(mut self) -> Result<()> {
        let result = match self.start() {
            Ok(()) => self.event_loop().await,
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            log::error!("Node stopped with error: {err}");
        }
        self.shutdown_manager.stop();
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                msg = self.inbound.recv() => {
                    match msg {
                        Some((sender, message)) => {
                            let actions = self.handle_message(&sender, message)?;
                            self.dispatch(actions)?;
                        }
                        None => {
                            log::info!("Inbound channel closed");
                            return Ok(());
                        }
                    }
                }

                Some(()) = self.catchup.next() => {
                    let actions = self.on_catchup_timeout()?;
                    self.dispatch(actions)?;
                }

                Some(()) = next_block_timeout(&mut self.aggregator) => {
                    let actions = self.on_block_timeout()?;
                    self.dispatch(actions)?;
                }

                _ = self.shutdown_manager.requested() => {
                    log::info!("Shutting down node");
                    return Ok(());
                }
            }
        }
    }

    /// Handles one message from `sender`. Errors are fatal for the node.
    pub fn handle_message(&mut self, sender: &NodeId, message: Message) -> Result<Vec<Action>> {
        log::trace!("{} from {sender}", message.kind());

        let actions = match message {
            Message::SubBlockContender(contender) => match self.aggregator.as_mut() {
                Some(aggregator) => {
                    let actions = aggregator.on_sub_block_contender(sender, *contender)?;
                    self.after_local_commit(actions)
                }
                None => {
                    log::debug!("Delegate ignores sub-block contender from {sender}");
                    vec![]
                }
            },
            Message::BlockIndexRequest(request) => {
                self.catchup.on_block_index_req(sender, request)?
            }
            Message::BlockIndexReply(reply) => self.catchup.on_block_index_reply(sender, reply),
            Message::BlockDataRequest(request) => self.catchup.on_block_data_req(sender, request)?,
            Message::BlockDataReply(block) => {
                let actions = self.catchup.on_block_data_reply(sender, *block)?;
                self.after_catchup(actions)?
            }
            Message::NewBlockNotification(notification) => {
                let actions = self.catchup.on_new_block_notification(sender, notification)?;
                self.after_catchup(actions)?
            }
            Message::FailedBlockNotification(notification) => {
                log::info!(
                    "Block {} on top of {} failed according to {sender}",
                    notification.block_num,
                    notification.prev_block_hash
                );
                vec![]
            }
        };
        Ok(actions)
    }

    pub fn on_catchup_timeout(&mut self) -> Result<Vec<Action>> {
        let actions = self.catchup.on_timeout()?;
        Ok(actions)
    }

    pub fn on_block_timeout(&mut self) -> Result<Vec<Action>> {
        match self.aggregator.as_mut() {
            Some(aggregator) => {
                let actions = aggregator.on_timeout()?;
                Ok(self.after_local_commit(actions))
            }
            None => Ok(vec![]),
        }
    }

    //Blocks committed by the aggregator move the catchup tip
    fn after_local_commit(&mut self, mut actions: Vec<Action>) -> Vec<Action> {
        let mut followups = vec![];
        for action in &actions {
            if let Action::BlockApplied {
                block_num,
                block_hash,
            } = action
            {
                followups.extend(self.catchup.on_local_block_committed(*block_num, *block_hash));
            }
        }
        actions.extend(followups);
        actions
    }

    //Blocks applied by catchup invalidate the aggregator's pending block
    fn after_catchup(&mut self, actions: Vec<Action>) -> Result<Vec<Action>> {
        let applied = actions
            .iter()
            .any(|action| matches!(action, Action::BlockApplied { .. }));
        if applied {
            if let Some(aggregator) = self.aggregator.as_mut() {
                aggregator.on_chain_advanced()?;
            }
        }
        Ok(actions)
    }

    fn dispatch(&self, actions: Vec<Action>) -> Result<()> {
        for action in actions {
            log::trace!("Action: {action:?}");
            self.outbound
                .send(action)
                .map_err(|_| anyhow!("Outbound channel closed"))?;
        }
        Ok(())
    }
}

async fn next_block_timeout(aggregator: &mut Option<BlockAggregator>) -> Option<()> {
    match aggregator {
        Some(aggregator) => aggregator.next().await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use crate::network::message::{BlockIndexReply, BlockIndexRequest};
    use crate::testing;
    use crate::utilities::hash::HashType;

    use super::*;

    #[test]
    fn test_masternode_commits_block() {
        crate::logging::init_test();
        let network = testing::network(3, 3);
        let (mut node, _handle, _outbound) = Node::new(network.context(0)).unwrap();

        let d = &network.delegates;
        let mut committed = vec![];
        for delegate in d {
            let contender = testing::contender(delegate, 0, b"tx", HashType::ZERO);
            committed.extend(
                node.handle_message(
                    &delegate.node_id(),
                    Message::SubBlockContender(Box::new(contender)),
                )
                .unwrap(),
            );
        }

        assert_matches!(committed[0], Action::BlockApplied { block_num: 1, .. });
        assert_matches!(
            &committed[1],
            Action::Broadcast { message: Message::NewBlockNotification(n) } if n.block_num == 1
        );
        assert_eq!(committed.len(), 2);
        assert_eq!(node.catchup().curr_num(), 1);
    }

    #[test]
    fn test_delegate_ignores_contenders() {
        let network = testing::network(3, 3);
        let (mut node, _handle, _outbound) = Node::new(network.delegate_context(0)).unwrap();

        let delegate = &network.delegates[1];
        let contender = testing::contender(delegate, 0, b"tx", HashType::ZERO);
        let actions = node
            .handle_message(&delegate.node_id(), Message::SubBlockContender(Box::new(contender)))
            .unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn test_caught_up_block_resets_aggregator() {
        let network = testing::network(3, 3);
        let chain = testing::chain(1);
        let (mut node, _handle, _outbound) = Node::new(network.context(0)).unwrap();
        let m = network.masternode_ids();
        let d = &network.delegates;

        node.start().unwrap();
        let contender = testing::contender(&d[0], 0, b"x", HashType::ZERO);
        node.handle_message(&d[0].node_id(), Message::SubBlockContender(Box::new(contender)))
            .unwrap();

        node.handle_message(
            &m[1],
            Message::BlockIndexReply(BlockIndexReply {
                indices: vec![testing::index_entry(&chain[0], &m[1..])],
            }),
        )
        .unwrap();
        let actions = node
            .handle_message(&m[1], Message::BlockDataReply(Box::new(chain[0].clone())))
            .unwrap();

        assert_matches!(&actions[..], [Action::BlockApplied { block_num: 1, .. }]);
        let aggregator = node.aggregator.as_ref().unwrap();
        assert!(!aggregator.contender().has_contenders());
        assert_eq!(aggregator.contender().curr_block_hash(), chain[0].block_hash);
    }

    #[tokio::test]
    async fn test_run_loop() {
        let network = testing::network(3, 3);
        let chain = testing::chain(2);
        let ctx = network.context(0);
        testing::store(&ctx, &chain);
        let (node, handle, mut outbound) = Node::new(ctx).unwrap();
        let mut shutdown = handle.shutdown.clone();
        let task = tokio::spawn(node.run());

        //First catchup round
        assert_matches!(
            outbound.recv().await,
            Some(Action::Broadcast { message: Message::BlockIndexRequest(r) })
                if r.block_hash == chain[1].block_hash
        );

        let requester = network.delegates[0].node_id();
        handle
            .inbound
            .send((
                requester,
                Message::BlockIndexRequest(BlockIndexRequest {
                    block_hash: HashType::ZERO,
                }),
            ))
            .unwrap();
        assert_matches!(
            outbound.recv().await,
            Some(Action::Send { to, message: Message::BlockIndexReply(reply) })
                if to == requester && reply.indices.len() == 2
        );

        shutdown.shutdown();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_exhausted_retries() {
        let mut network = testing::network(3, 3);
        network.config.catchup.timeout_ms = 5;
        network.config.catchup.max_retries = 2;
        let (node, _handle, mut outbound) = Node::new(network.delegate_context(0)).unwrap();

        let result = node.run().await;
        assert_matches!(result, Err(NodeError::Catchup(CatchupError::RetriesExhausted(2))));

        let mut requests = 0;
        while let Ok(action) = outbound.try_recv() {
            assert_matches!(action, Action::Broadcast { message: Message::BlockIndexRequest(_) });
            requests += 1;
        }
        assert_eq!(requests, 2);
    }

    #[test]
    fn test_new_rejects_unlisted_node() {
        let network = testing::network(1, 1);
        let mut config = network.config.clone();
        config.node.private_key = testing::keypair(250).to_base58();

        let storage = crate::storage::shared(crate::storage::MemoryStorage::new());
        assert_matches!(
            NodeContext::new(config, storage).err(),
            Some(ConfigurationError::Invalid(_))
        );
    }
}
