use serde::{Deserialize, Serialize};

use crate::block::types::block::BlockData;
use crate::block::types::contender::SubBlockContender;
use crate::crypto::NodeId;
use crate::utilities::encoding::{decode, encode};
use crate::utilities::hash::HashType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndexRequest {
    /// Hash of the requester's chain tip.
    pub block_hash: HashType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndexEntry {
    pub block_num: u64,
    pub block_hash: HashType,
    pub block_owners: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndexReply {
    /// Blocks after the requester's tip, ordered by block number.
    pub indices: Vec<BlockIndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDataRequest {
    pub block_num: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBlockNotification {
    pub block_hash: HashType,
    pub block_num: u64,
    pub block_owners: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBlockNotification {
    pub prev_block_hash: HashType,
    pub block_hash: HashType,
    pub block_num: u64,
    pub first_sb_idx: u32,
    /// Distinct input hashes seen per sub-block, in sub-block index order.
    pub input_hashes: Vec<Vec<HashType>>,
}

/// Every message the consensus and catchup core consumes or produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    SubBlockContender(Box<SubBlockContender>),
    BlockIndexRequest(BlockIndexRequest),
    BlockIndexReply(BlockIndexReply),
    BlockDataRequest(BlockDataRequest),
    BlockDataReply(Box<BlockData>),
    NewBlockNotification(NewBlockNotification),
    FailedBlockNotification(FailedBlockNotification),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SubBlockContender(_) => "SubBlockContender",
            Message::BlockIndexRequest(_) => "BlockIndexRequest",
            Message::BlockIndexReply(_) => "BlockIndexReply",
            Message::BlockDataRequest(_) => "BlockDataRequest",
            Message::BlockDataReply(_) => "BlockDataReply",
            Message::NewBlockNotification(_) => "NewBlockNotification",
            Message::FailedBlockNotification(_) => "FailedBlockNotification",
        }
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        decode(bytes)
    }
}

/// Side effect requested by a handler. Handlers finish their state changes before
/// returning actions, the node executes them afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send to a single node.
    Send { to: NodeId, message: Message },
    /// Publish to everyone interested in this message kind.
    Broadcast { message: Message },
    /// A block was persisted and the local chain tip moved to it.
    BlockApplied { block_num: u64, block_hash: HashType },
}

impl Action {
    pub(crate) fn send(to: NodeId, message: Message) -> Self {
        Action::Send { to, message }
    }

    pub(crate) fn broadcast(message: Message) -> Self {
        Action::Broadcast { message }
    }
}
