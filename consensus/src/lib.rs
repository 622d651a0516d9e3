//! Consensus: double-spend resolution via representative voting.
//!
//! Open Representative Voting (ORV):
//! - Each account delegates its weight to a representative.
//! - Representatives vote on conflicting blocks that share a root.
//! - A block is confirmed once the votes for it exceed the online quorum
//!   delta (67% of online weight, floored at a configured minimum).
//! - Confirmed winners are handed to the ledger for cementing.
//!
//! ## Module overview
//!
//! - [`election`]: Election state machine (Passive → Active → Confirmed/Expired).
//! - [`tally`]: Weight tally and quorum test.
//! - [`active_elections`]: Container managing all ongoing elections and the request loop.
//! - [`vote_processor`]: Tiered admission queue with batched signature verification.
//! - [`election_scheduler`]: Balance-ordered backlog feeding the container.
//! - [`vote_cache`]: Votes that arrived before their election.
//! - [`vote_generator`]: Local normal and final vote signing.
//! - [`confirmation_solicitor`]: confirm_req batching and winner rebroadcast.
//! - [`online_reps`]: Online and trended weight, quorum delta.
//! - [`rep_tiers`]: Weight tiers used for vote admission.
//! - [`error`]: Consensus error types.

pub mod active_elections;
pub mod config;
pub mod confirmation_solicitor;
pub mod election;
pub mod election_scheduler;
pub mod error;
pub mod local_vote_history;
pub mod online_reps;
pub mod recently_confirmed;
pub mod rep_tiers;
pub mod stats;
pub mod tally;
pub mod uniquer;
pub mod vote_cache;
pub mod vote_generator;
pub mod vote_processor;
pub mod vote_spacing;
pub mod wallets;

pub use active_elections::ActiveElections;
pub use config::{
    ActiveElectionsConfig, ElectionSchedulerConfig, FrontiersConfirmationMode, VoteCacheConfig,
    VoteProcessorConfig,
};
pub use confirmation_solicitor::ConfirmationSolicitor;
pub use election::{
    ConfirmationAction, Election, ElectionBehavior, ElectionState, ElectionStatus,
    ElectionStatusType, VoteCode, VoteInfo, VoteSource,
};
pub use election_scheduler::ElectionScheduler;
pub use error::ConsensusError;
pub use local_vote_history::LocalVoteHistory;
pub use online_reps::OnlineReps;
pub use recently_confirmed::RecentlyConfirmed;
pub use rep_tiers::{RepTier, RepTiers};
pub use stats::{DetailType, StatType, Stats};
pub use tally::{have_quorum, tally, Tally};
pub use uniquer::{BlockUniquer, Uniquer, VoteUniquer};
pub use vote_cache::VoteCache;
pub use vote_generator::VoteGenerator;
pub use vote_processor::VoteProcessor;
pub use vote_spacing::VoteSpacing;
pub use wallets::{KeyWallets, Wallets};
