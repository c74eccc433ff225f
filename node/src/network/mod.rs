//! Messages exchanged by the consensus and catchup core, and the roster of known nodes.
//!
//! Framing and transport are not part of this crate. The node runtime receives
//! `(NodeId, Message)` pairs and emits [Action]s for a transport to deliver.

pub(crate) mod message;
pub(crate) mod roster;

pub use message::{
    Action, BlockDataRequest, BlockIndexEntry, BlockIndexReply, BlockIndexRequest,
    FailedBlockNotification, Message, NewBlockNotification,
};
pub use roster::{majority_threshold, Role, Roster};
