use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{Keypair, KeyPairError, NodeId};
use crate::network::roster::{Role, Roster};

//block settings
pub const DEFAULT_SUB_BLOCKS_PER_BLOCK: u32 = 1;
pub const DEFAULT_BLOCK_TIMEOUT_MS: u64 = 5000;

//catchup settings
pub const DEFAULT_CATCHUP_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_CATCHUP_MAX_RETRIES: u32 = 10;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration file error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Configuration serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Configuration IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid key '{key}': {source}")]
    InvalidKey { key: String, source: KeyPairError },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub(crate) type Result<T> = std::result::Result<T, ConfigurationError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub node: NodeConfiguration,
    pub roster: RosterConfiguration,
    #[serde(default)]
    pub block: BlockConfiguration,
    #[serde(default)]
    pub catchup: CatchupConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfiguration {
    /// Base58 encoded ed25519 secret key.
    pub private_key: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterConfiguration {
    /// Base58 encoded masternode public keys.
    pub masternodes: Vec<String>,
    /// Base58 encoded delegate public keys.
    pub delegates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfiguration {
    pub sub_blocks_per_block: u32,
    /// How long a masternode waits for block consensus after the first contender.
    pub block_timeout_ms: u64,
}

impl Default for BlockConfiguration {
    fn default() -> Self {
        Self {
            sub_blocks_per_block: DEFAULT_SUB_BLOCKS_PER_BLOCK,
            block_timeout_ms: DEFAULT_BLOCK_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatchupConfiguration {
    pub timeout_ms: u64,
    /// Consecutive timeouts without progress before catchup gives up.
    pub max_retries: u32,
}

impl Default for CatchupConfiguration {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_CATCHUP_TIMEOUT_MS,
            max_retries: DEFAULT_CATCHUP_MAX_RETRIES,
        }
    }
}

impl Configuration {
    pub fn try_load<I: Into<PathBuf>>(path: I) -> Result<Configuration> {
        let path = path.into();
        log::info!("Loading configuration from {path:?}");
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()?;
        Self::validated(config.try_deserialize()?)
    }

    pub fn try_load_from_str(toml: &str) -> Result<Configuration> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Self::validated(config.try_deserialize()?)
    }

    pub fn try_write<I: Into<PathBuf>>(&self, path: I) -> Result<()> {
        let config = toml::to_string(&self)?;
        let config = format!("#This file is generated by lamina, edit with care\n{config}");

        let mut file = std::fs::File::create(path.into())?;
        file.write_all(config.as_bytes())?;
        Ok(())
    }

    pub fn keypair(&self) -> Result<Keypair> {
        Keypair::from_base58(&self.node.private_key).map_err(|source| {
            ConfigurationError::InvalidKey {
                key: "node.private_key".to_string(),
                source,
            }
        })
    }

    pub fn roster(&self) -> Result<Roster> {
        let masternodes = parse_keys(&self.roster.masternodes)?;
        let delegates = parse_keys(&self.roster.delegates)?;
        Ok(Roster::new(masternodes, delegates))
    }

    fn validated(configuration: Configuration) -> Result<Configuration> {
        if configuration.block.sub_blocks_per_block == 0 {
            return Err(ConfigurationError::Invalid(
                "block.sub_blocks_per_block must be at least 1".to_string(),
            ));
        }
        if configuration.roster.masternodes.is_empty() {
            return Err(ConfigurationError::Invalid(
                "roster.masternodes can't be empty".to_string(),
            ));
        }
        Ok(configuration)
    }
}

fn parse_keys(keys: &[String]) -> Result<Vec<NodeId>> {
    keys.iter()
        .map(|key| {
            key.parse::<NodeId>()
                .map_err(|source| ConfigurationError::InvalidKey {
                    key: key.clone(),
                    source,
                })
        })
        .collect()
}
