//! Network identifier and the network-dependent constants derived from it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::amount::Amount;

/// Identifies which network a node is connected to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// The production network.
    Live,
    /// The public test network.
    Test,
    /// Local development network.
    Dev,
}

impl NetworkId {
    /// Human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Test => "test",
            Self::Dev => "dev",
        }
    }
}

/// Network-parameter-dependent thresholds.
///
/// Built once from a [`NetworkId`] and handed to every component that needs
/// it. Fields are public so tests can tighten individual values.
#[derive(Clone, Debug)]
pub struct NetworkParams {
    pub network: NetworkId,
    /// Unit of election timing: passive dwell, confirm_req pacing and block
    /// rebroadcast are multiples of it.
    pub base_latency: Duration,
    /// Pause between rounds of the active elections request loop.
    pub request_interval: Duration,
    /// Minimum spacing between votes an election generates for its winner.
    pub vote_broadcast_interval: Duration,
    /// How long the vote generator waits to fill a batch.
    pub vote_generator_delay: Duration,
    /// Online weight sampling period.
    pub online_weight_period: Duration,
    /// Quorum as a percentage of online weight.
    pub online_weight_quorum: u8,
    /// Floor applied to online weight in quorum calculations.
    pub online_weight_minimum: Amount,
    /// Principal representatives hold at least `1 / principal_weight_factor`
    /// of the trended online weight.
    pub principal_weight_factor: u128,
    /// Block broadcasts allowed per solicitation round.
    pub max_block_broadcasts: usize,
    /// Confirmation requests queued per election per round.
    pub max_election_requests: usize,
    /// Root/hash pairs per confirm_req message.
    pub confirm_req_hashes_max: usize,
    /// Hashes per vote.
    pub max_hashes_per_vote: usize,
    /// Candidate blocks per election.
    pub election_max_blocks: usize,
}

impl NetworkParams {
    pub fn new(network: NetworkId) -> Self {
        let dev = network == NetworkId::Dev;
        Self {
            network,
            base_latency: if dev {
                Duration::from_millis(25)
            } else {
                Duration::from_millis(1000)
            },
            request_interval: if dev {
                Duration::from_millis(20)
            } else {
                Duration::from_millis(500)
            },
            vote_broadcast_interval: if dev {
                Duration::from_millis(500)
            } else {
                Duration::from_secs(15)
            },
            vote_generator_delay: if dev {
                Duration::from_millis(10)
            } else {
                Duration::from_millis(100)
            },
            online_weight_period: if dev {
                Duration::from_secs(1)
            } else {
                Duration::from_secs(5 * 60)
            },
            online_weight_quorum: 67,
            online_weight_minimum: Amount::nano(60_000_000),
            principal_weight_factor: 1000,
            max_block_broadcasts: if dev { 4 } else { 30 },
            max_election_requests: 50,
            confirm_req_hashes_max: 7,
            max_hashes_per_vote: 12,
            election_max_blocks: 10,
        }
    }

    pub fn live() -> Self {
        Self::new(NetworkId::Live)
    }

    pub fn dev() -> Self {
        Self::new(NetworkId::Dev)
    }

    pub fn is_dev_network(&self) -> bool {
        self.network == NetworkId::Dev
    }
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self::live()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_network_is_faster() {
        let dev = NetworkParams::dev();
        let live = NetworkParams::live();
        assert!(dev.is_dev_network());
        assert!(!live.is_dev_network());
        assert!(dev.base_latency < live.base_latency);
        assert_eq!(dev.max_block_broadcasts, 4);
        assert_eq!(live.max_block_broadcasts, 30);
    }

    #[test]
    fn network_names() {
        assert_eq!(NetworkId::Live.as_str(), "live");
        assert_eq!(NetworkId::Dev.as_str(), "dev");
    }
}
