use std::sync::Arc;

use crate::config::{Configuration, ConfigurationError};
use crate::crypto::{Keypair, NodeId};
use crate::network::roster::{Role, Roster};
use crate::storage::SharedStorage;

/// Everything a node's components share. Created once at node start and handed to the
/// constructors of the components which need it.
#[derive(Clone)]
pub struct NodeContext {
    pub(crate) node_id: NodeId,
    pub(crate) keypair: Arc<Keypair>,
    pub(crate) role: Role,
    pub(crate) roster: Arc<Roster>,
    pub(crate) config: Arc<Configuration>,
    pub(crate) storage: SharedStorage,
}

impl NodeContext {
    pub fn new(
        config: Configuration,
        storage: SharedStorage,
    ) -> Result<Self, ConfigurationError> {
        let keypair = config.keypair()?;
        let roster = config.roster()?;
        let node_id = keypair.node_id();
        let role = config.node.role;

        let listed = match role {
            Role::Masternode => roster.is_masternode(&node_id),
            Role::Delegate => roster.is_delegate(&node_id),
        };
        if !listed {
            return Err(ConfigurationError::Invalid(format!(
                "Local node {node_id} is not listed in the roster as {role:?}"
            )));
        }

        log::info!("Node context: id: {node_id}, role: {role:?}");
        Ok(Self {
            node_id,
            keypair: Arc::new(keypair),
            role,
            roster: Arc::new(roster),
            config: Arc::new(config),
            storage,
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    pub fn is_masternode(&self) -> bool {
        self.role == Role::Masternode
    }

    pub(crate) fn sub_blocks_per_block(&self) -> u32 {
        self.config.block.sub_blocks_per_block
    }
}
