//! Statistics counters for the election core.
//!
//! Every rejection or notable transition bumps a counter labelled with a
//! `(type, detail)` pair. Counters live in a dedicated prometheus
//! [`Registry`] so the node can expose them next to its other metrics.

use prometheus::{register_int_counter_vec_with_registry, IntCounterVec, Opts, Registry};

use crate::election::ElectionBehavior;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatType {
    Election,
    ActiveElections,
    ActiveStarted,
    ActiveConfirmed,
    ActiveExpired,
    ActiveDropped,
    Vote,
    VoteProcessor,
    VoteGenerator,
    VoteCache,
    ElectionScheduler,
    ConfirmationSolicitor,
    BlockProcessor,
    ConfirmationHeight,
    OnlineReps,
}

impl StatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Election => "election",
            Self::ActiveElections => "active_elections",
            Self::ActiveStarted => "active_started",
            Self::ActiveConfirmed => "active_confirmed",
            Self::ActiveExpired => "active_expired",
            Self::ActiveDropped => "active_dropped",
            Self::Vote => "vote",
            Self::VoteProcessor => "vote_processor",
            Self::VoteGenerator => "vote_generator",
            Self::VoteCache => "vote_cache",
            Self::ElectionScheduler => "election_scheduler",
            Self::ConfirmationSolicitor => "confirmation_solicitor",
            Self::BlockProcessor => "block_processor",
            Self::ConfirmationHeight => "confirmation_height",
            Self::OnlineReps => "online_reps",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DetailType {
    All,
    Loop,
    // election behaviors
    Normal,
    Manual,
    Optimistic,
    // election
    VoteNew,
    VoteCached,
    GenerateVote,
    GenerateVoteNormal,
    GenerateVoteFinal,
    ForkSwitch,
    ConfirmOnce,
    ConfirmOnceFailed,
    ConfirmedQuorum,
    ConfirmedHeight,
    ConfirmedInactive,
    ProcessConfirmedRetry,
    ProcessConfirmedGiveUp,
    // active elections
    InsertFailed,
    ElectionBlockConflict,
    ReplaceByWeight,
    Trim,
    FrontierConfirmation,
    // votes
    VoteValid,
    VoteReplay,
    VoteIndeterminate,
    VoteInvalid,
    VoteIgnored,
    VoteOverflow,
    Republish,
    // vote generator
    GeneratorBroadcasts,
    GeneratorSpacing,
    GeneratorCached,
    // vote cache
    Insert,
    Update,
    Replay,
    // scheduler
    Activated,
    InsertPriority,
    InsertManual,
    Overfill,
    // solicitor
    Broadcast,
    Request,
    ChannelFull,
    // block processor
    Process,
    Progress,
    Fork,
    Force,
    Rollback,
    RollbackFailed,
    Overflow,
    // confirmation height
    Cemented,
    AlreadyCemented,
    // online reps
    Sample,
}

impl DetailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Loop => "loop",
            Self::Normal => "normal",
            Self::Manual => "manual",
            Self::Optimistic => "optimistic",
            Self::VoteNew => "vote_new",
            Self::VoteCached => "vote_cached",
            Self::GenerateVote => "generate_vote",
            Self::GenerateVoteNormal => "generate_vote_normal",
            Self::GenerateVoteFinal => "generate_vote_final",
            Self::ForkSwitch => "fork_switch",
            Self::ConfirmOnce => "confirm_once",
            Self::ConfirmOnceFailed => "confirm_once_failed",
            Self::ConfirmedQuorum => "confirmed_quorum",
            Self::ConfirmedHeight => "confirmed_height",
            Self::ConfirmedInactive => "confirmed_inactive",
            Self::ProcessConfirmedRetry => "process_confirmed_retry",
            Self::ProcessConfirmedGiveUp => "process_confirmed_give_up",
            Self::InsertFailed => "insert_failed",
            Self::ElectionBlockConflict => "election_block_conflict",
            Self::ReplaceByWeight => "replace_by_weight",
            Self::Trim => "trim",
            Self::FrontierConfirmation => "frontier_confirmation",
            Self::VoteValid => "vote_valid",
            Self::VoteReplay => "vote_replay",
            Self::VoteIndeterminate => "vote_indeterminate",
            Self::VoteInvalid => "vote_invalid",
            Self::VoteIgnored => "vote_ignored",
            Self::VoteOverflow => "vote_overflow",
            Self::Republish => "republish",
            Self::GeneratorBroadcasts => "generator_broadcasts",
            Self::GeneratorSpacing => "generator_spacing",
            Self::GeneratorCached => "generator_cached",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Replay => "replay",
            Self::Activated => "activated",
            Self::InsertPriority => "insert_priority",
            Self::InsertManual => "insert_manual",
            Self::Overfill => "overfill",
            Self::Broadcast => "broadcast",
            Self::Request => "request",
            Self::ChannelFull => "channel_full",
            Self::Process => "process",
            Self::Progress => "progress",
            Self::Fork => "fork",
            Self::Force => "force",
            Self::Rollback => "rollback",
            Self::RollbackFailed => "rollback_failed",
            Self::Overflow => "overflow",
            Self::Cemented => "cemented",
            Self::AlreadyCemented => "already_cemented",
            Self::Sample => "sample",
        }
    }
}

impl From<ElectionBehavior> for DetailType {
    fn from(behavior: ElectionBehavior) -> Self {
        match behavior {
            ElectionBehavior::Normal => Self::Normal,
            ElectionBehavior::Manual => Self::Manual,
            ElectionBehavior::Optimistic => Self::Optimistic,
        }
    }
}

/// Counter collection shared by every election-core component.
pub struct Stats {
    registry: Registry,
    counters: IntCounterVec,
}

impl Stats {
    pub fn new() -> Self {
        let registry = Registry::new();
        let counters = register_int_counter_vec_with_registry!(
            Opts::new("orv_stats_total", "Election core event counters"),
            &["type", "detail"],
            registry
        )
        .expect("failed to register stats counter vec");
        Self { registry, counters }
    }

    pub fn inc(&self, stat_type: StatType, detail: DetailType) {
        self.add(stat_type, detail, 1);
    }

    pub fn add(&self, stat_type: StatType, detail: DetailType, value: u64) {
        self.counters
            .with_label_values(&[stat_type.as_str(), detail.as_str()])
            .inc_by(value);
    }

    pub fn count(&self, stat_type: StatType, detail: DetailType) -> u64 {
        self.counters
            .with_label_values(&[stat_type.as_str(), detail.as_str()])
            .get()
    }

    /// The registry owning the counters, for text exposition.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}
