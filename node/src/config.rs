//! Node configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::Path;

use orv_consensus::{
    ActiveElectionsConfig, ElectionSchedulerConfig, VoteCacheConfig, VoteProcessorConfig,
};
use orv_ledger::ConfirmationHeightConfig;
use orv_types::{NetworkId, NetworkParams};

use crate::logging::LogFormat;
use crate::NodeError;

/// Configuration for a node.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests). Every field and section is
/// optional in the file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Which network's parameters to use.
    #[serde(default = "default_network")]
    pub network: NetworkId,

    /// Whether local representatives generate votes.
    #[serde(default = "default_true")]
    pub enable_voting: bool,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub active_elections: ActiveElectionsConfig,

    #[serde(default)]
    pub vote_processor: VoteProcessorConfig,

    #[serde(default)]
    pub scheduler: ElectionSchedulerConfig,

    #[serde(default)]
    pub vote_cache: VoteCacheConfig,

    #[serde(default)]
    pub confirmation_height: ConfirmationHeightConfig,

    #[serde(default)]
    pub block_processor: BlockProcessorConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProcessorConfig {
    /// Blocks queued beyond this are dropped. Forced blocks are exempt.
    #[serde(default = "default_block_queue")]
    pub max_queue: usize,
}

// ── Serde default helpers ──

fn default_network() -> NetworkId {
    NetworkId::Dev
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_block_queue() -> usize {
    8192
}

// ── Impl ──

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// The network parameters this configuration selects.
    pub fn network_params(&self) -> NetworkParams {
        NetworkParams::new(self.network)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            enable_voting: default_true(),
            log_format: LogFormat::default(),
            log_level: default_log_level(),
            active_elections: ActiveElectionsConfig::default(),
            vote_processor: VoteProcessorConfig::default(),
            scheduler: ElectionSchedulerConfig::default(),
            vote_cache: VoteCacheConfig::default(),
            confirmation_height: ConfirmationHeightConfig::default(),
            block_processor: BlockProcessorConfig::default(),
        }
    }
}

impl Default for BlockProcessorConfig {
    fn default() -> Self {
        Self {
            max_queue: default_block_queue(),
        }
    }
}
