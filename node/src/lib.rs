//! ORV node: owns the election core and its supporting services.
//!
//! The node is the coordinator that:
//! - Applies incoming and local blocks to the ledger
//! - Starts elections for new blocks and for forks
//! - Verifies and routes votes into elections
//! - Cements confirmed winners through the confirmation height processor
//! - Samples online representative weight and recomputes vote tiers

pub mod block_processor;
pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod online_weight;

pub use block_processor::{BlockProcessor, BlockSource};
pub use config::{BlockProcessorConfig, NodeConfig};
pub use error::NodeError;
pub use logging::{init_logging, try_init_logging, LogFormat};
pub use node::Node;
pub use online_weight::OnlineWeightSampler;
