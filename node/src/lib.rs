//! Consensus aggregation and chain synchronization core of a permissioned blockchain node.
//!
//! Delegates propose signed sub-block contenders, masternodes aggregate them into blocks by
//! majority vote, and every node catches up to the network's chain tip through an index
//! exchange followed by block fetching. Transport, execution and durable storage are left to
//! the embedding node.

pub mod block;
pub mod catchup;
pub mod config;
pub mod core;
pub mod crypto;
pub mod logging;
pub mod network;
pub mod storage;
pub mod utilities;

#[cfg(test)]
pub(crate) mod testing;
