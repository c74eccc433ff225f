use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::crypto::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Collects contenders, finalizes and stores blocks, answers catchup requests.
    Masternode,
    /// Executes transactions and proposes sub-block contenders.
    Delegate,
}

/// Majority threshold for a population of `population` voters, `ceil(2/3 * population)`.
pub fn majority_threshold(population: usize) -> usize {
    (2 * population + 2) / 3
}

/// Known masternode and delegate sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    masternodes: Vec<NodeId>,
    delegates: Vec<NodeId>,
    masternode_set: HashSet<NodeId>,
    delegate_set: HashSet<NodeId>,
}

impl Roster {
    pub fn new(masternodes: Vec<NodeId>, delegates: Vec<NodeId>) -> Self {
        let masternode_set = masternodes.iter().copied().collect::<HashSet<_>>();
        let delegate_set = delegates.iter().copied().collect::<HashSet<_>>();
        log::info!(
            "Roster: masternodes: {}, delegates: {}",
            masternode_set.len(),
            delegate_set.len()
        );
        Self {
            masternodes,
            delegates,
            masternode_set,
            delegate_set,
        }
    }

    pub fn masternodes(&self) -> &[NodeId] {
        &self.masternodes
    }

    pub fn delegates(&self) -> &[NodeId] {
        &self.delegates
    }

    pub fn is_masternode(&self, node_id: &NodeId) -> bool {
        self.masternode_set.contains(node_id)
    }

    pub fn is_delegate(&self, node_id: &NodeId) -> bool {
        self.delegate_set.contains(node_id)
    }

    pub fn delegate_population(&self) -> usize {
        self.delegate_set.len()
    }

    pub fn masternode_population(&self) -> usize {
        self.masternode_set.len()
    }

    /// Votes needed for a sub-block result hash to be agreed.
    pub fn delegate_quorum(&self) -> usize {
        majority_threshold(self.delegate_population())
    }

    /// Distinct masternodes which have to answer an index request before `local` trusts the answer.
    ///
    /// A masternode doesn't answer its own requests, so it needs one reply less. A masternode
    /// which is the only one in the network is trivially caught up and needs none.
    pub fn catchup_quorum(&self, local: &NodeId) -> usize {
        let threshold = majority_threshold(self.masternode_population());
        if self.is_masternode(local) {
            if self.masternode_population() <= 1 {
                0
            } else {
                threshold.saturating_sub(1).max(1)
            }
        } else {
            threshold
        }
    }

    /// All masternodes except `local`.
    pub fn other_masternodes<'a>(&'a self, local: &'a NodeId) -> impl Iterator<Item = &'a NodeId> {
        self.masternodes.iter().filter(move |id| *id != local)
    }
}
