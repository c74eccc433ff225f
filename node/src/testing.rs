//! Test fixtures: keyed networks, signed contenders and deterministic chains.

use crate::block::types::block::{BlockData, SubBlock};
use crate::block::types::contender::SubBlockContender;
use crate::block::types::transaction::Transaction;
use crate::config::{
    BlockConfiguration, CatchupConfiguration, Configuration, NodeConfiguration,
    RosterConfiguration,
};
use crate::core::context::NodeContext;
use crate::crypto::{Keypair, NodeId};
use crate::network::message::BlockIndexEntry;
use crate::network::roster::{Role, Roster};
use crate::storage::{self, MemoryStorage};
use crate::utilities::hash::HashType;
use crate::utilities::merkle::MerkleTree;

const MASTERNODE_SEED: u8 = 1;
const DELEGATE_SEED: u8 = 100;

pub(crate) fn keypair(seed: u8) -> Keypair {
    Keypair::from_seed([seed; 32])
}

pub(crate) struct TestNetwork {
    pub(crate) masternodes: Vec<Keypair>,
    pub(crate) delegates: Vec<Keypair>,
    /// Shared settings, the node section is filled in per context.
    pub(crate) config: Configuration,
}

pub(crate) fn network(masternodes: u8, delegates: u8) -> TestNetwork {
    network_with_layout(masternodes, delegates, 1)
}

pub(crate) fn network_with_layout(
    masternodes: u8,
    delegates: u8,
    sub_blocks_per_block: u32,
) -> TestNetwork {
    let masternodes = (0..masternodes)
        .map(|i| keypair(MASTERNODE_SEED + i))
        .collect::<Vec<_>>();
    let delegates = (0..delegates)
        .map(|i| keypair(DELEGATE_SEED + i))
        .collect::<Vec<_>>();

    let config = Configuration {
        node: NodeConfiguration {
            private_key: masternodes[0].to_base58(),
            role: Role::Masternode,
        },
        roster: RosterConfiguration {
            masternodes: masternodes.iter().map(|k| k.node_id().to_string()).collect(),
            delegates: delegates.iter().map(|k| k.node_id().to_string()).collect(),
        },
        block: BlockConfiguration {
            sub_blocks_per_block,
            ..Default::default()
        },
        catchup: CatchupConfiguration::default(),
    };

    TestNetwork {
        masternodes,
        delegates,
        config,
    }
}

impl TestNetwork {
    pub(crate) fn roster(&self) -> Roster {
        self.config.roster().unwrap()
    }

    pub(crate) fn masternode_ids(&self) -> Vec<NodeId> {
        self.masternodes.iter().map(Keypair::node_id).collect()
    }

    /// Context of masternode `idx` with an empty chain.
    pub(crate) fn context(&self, idx: usize) -> NodeContext {
        self.node_context(&self.masternodes[idx], Role::Masternode)
    }

    /// Context of delegate `idx` with an empty chain.
    pub(crate) fn delegate_context(&self, idx: usize) -> NodeContext {
        self.node_context(&self.delegates[idx], Role::Delegate)
    }

    fn node_context(&self, keypair: &Keypair, role: Role) -> NodeContext {
        let mut config = self.config.clone();
        config.node.private_key = keypair.to_base58();
        config.node.role = role;
        NodeContext::new(config, storage::shared(MemoryStorage::new())).unwrap()
    }
}

/// Input hash the test contenders use for `payload`.
pub(crate) fn input_hash(payload: &[u8]) -> HashType {
    HashType::digest(&[&b"input:"[..], payload].concat())
}

/// Signed contender with two transactions derived from `payload`.
pub(crate) fn contender(
    keypair: &Keypair,
    sb_index: u32,
    payload: &[u8],
    prev_block_hash: HashType,
) -> SubBlockContender {
    let transactions = vec![
        Transaction::new([payload, &b":0"[..]].concat()),
        Transaction::new([payload, &b":1"[..]].concat()),
    ];
    SubBlockContender::new(
        sb_index,
        input_hash(payload),
        transactions,
        prev_block_hash,
        keypair,
    )
}

/// Blocks 1..=len chained from genesis, index 0 holds block 1. Chains of different length
/// share their prefix.
pub(crate) fn chain(len: u64) -> Vec<BlockData> {
    let mut blocks: Vec<BlockData> = vec![];
    for block_num in 1..=len {
        let prev = blocks
            .last()
            .map_or(HashType::ZERO, |block| block.block_hash);
        blocks.push(block(block_num, prev));
    }
    blocks
}

/// Unsigned single sub-block block with two transactions.
pub(crate) fn block(block_num: u64, prev_block_hash: HashType) -> BlockData {
    let transactions = (0..2)
        .map(|i| Transaction::new(format!("block {block_num} tx {i}").into_bytes()))
        .collect::<Vec<_>>();
    let merkle_leaves = transactions.iter().map(Transaction::hash).collect::<Vec<_>>();
    let merkle_root = MerkleTree::from_leaves(merkle_leaves.clone())
        .unwrap()
        .root();
    let sub_block = SubBlock {
        sb_index: 0,
        merkle_root,
        input_hash: HashType::digest(format!("block {block_num} input").as_bytes()),
        merkle_leaves,
        signatures: vec![],
        transactions,
    };
    BlockData::new(block_num, prev_block_hash, vec![], vec![sub_block])
}

pub(crate) fn index_entry(block: &BlockData, owners: &[NodeId]) -> BlockIndexEntry {
    BlockIndexEntry {
        block_num: block.block_num,
        block_hash: block.block_hash,
        block_owners: owners.to_vec(),
    }
}

pub(crate) fn store(ctx: &NodeContext, blocks: &[BlockData]) {
    let mut storage = ctx.storage.lock();
    for block in blocks {
        storage.store_block(block).unwrap();
    }
}
