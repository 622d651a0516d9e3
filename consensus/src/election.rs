//! Election state machine for a single qualified root.
//!
//! An election is created for the first block seen on a root and collects
//! competing blocks (forks) and the latest vote of every representative. The
//! container in [`crate::active_elections`] drives it through its states and
//! decides when the tally reaches quorum.
//!
//! All mutable state sits behind one mutex. The container may hold its own
//! lock while taking an election's, never the other way round.

use orv_messages::Vote;
use orv_types::{milliseconds_since_epoch, Account, Amount, Block, BlockHash, QualifiedRoot, Root};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::ConsensusError;

/// Passive elections become active after `base_latency * PASSIVE_DURATION_FACTOR`.
pub const PASSIVE_DURATION_FACTOR: u32 = 5;
/// Confirmed elections linger this many base latencies before expiring.
pub const CONFIRMED_DURATION_FACTOR: u32 = 5;
/// Blocks are rebroadcast at most once per `base_latency * BLOCK_BROADCAST_FACTOR`.
pub const BLOCK_BROADCAST_FACTOR: u32 = 15;

const NORMAL_TIME_TO_LIVE: Duration = Duration::from_secs(5 * 60);
const OPTIMISTIC_TIME_TO_LIVE: Duration = Duration::from_secs(60);

pub type ConfirmationAction = Box<dyn Fn(&Arc<Block>) + Send + Sync>;

/// Lifecycle of an election.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElectionState {
    /// Listening for votes, not yet soliciting.
    Passive,
    /// Soliciting votes and rebroadcasting the winner.
    Active,
    /// Quorum reached, waiting to be cemented and removed.
    Confirmed,
    ExpiredConfirmed,
    ExpiredUnconfirmed,
}

impl ElectionState {
    pub fn can_transition_to(self, next: ElectionState) -> bool {
        use ElectionState::*;
        matches!(
            (self, next),
            (Passive, Active)
                | (Passive, Confirmed)
                | (Passive, ExpiredUnconfirmed)
                | (Active, Confirmed)
                | (Active, ExpiredUnconfirmed)
                | (Confirmed, ExpiredConfirmed)
        )
    }

    pub fn is_confirmed(self) -> bool {
        matches!(self, Self::Confirmed | Self::ExpiredConfirmed)
    }

    pub fn is_expired(self) -> bool {
        matches!(self, Self::ExpiredConfirmed | Self::ExpiredUnconfirmed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passive => "passive",
            Self::Active => "active",
            Self::Confirmed => "confirmed",
            Self::ExpiredConfirmed => "expired_confirmed",
            Self::ExpiredUnconfirmed => "expired_unconfirmed",
        }
    }
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an election was started.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElectionBehavior {
    /// Started by the priority scheduler.
    #[default]
    Normal,
    /// Started explicitly; bypasses the vacancy check.
    Manual,
    /// Started by frontier confirmation for an uncemented account head.
    Optimistic,
}

impl ElectionBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Manual => "manual",
            Self::Optimistic => "optimistic",
        }
    }
}

/// How an election ended, or that it has not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionStatusType {
    #[default]
    Ongoing,
    ActiveConfirmedQuorum,
    ActiveConfirmationHeight,
    InactiveConfirmationHeight,
    Stopped,
}

impl ElectionStatusType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ongoing => "ongoing",
            Self::ActiveConfirmedQuorum => "active_confirmed_quorum",
            Self::ActiveConfirmationHeight => "active_confirmation_height",
            Self::InactiveConfirmationHeight => "inactive_confirmation_height",
            Self::Stopped => "stopped",
        }
    }
}

/// Snapshot of an election's outcome, handed to observers.
#[derive(Clone, Debug)]
pub struct ElectionStatus {
    pub winner: Arc<Block>,
    pub tally: Amount,
    pub final_tally: Amount,
    /// Wall-clock milliseconds since epoch at confirmation.
    pub election_end: u64,
    pub election_duration: Duration,
    pub confirmation_request_count: u32,
    pub block_count: u32,
    pub voter_count: u32,
    pub status_type: ElectionStatusType,
}

impl ElectionStatus {
    pub fn new(winner: Arc<Block>) -> Self {
        Self {
            winner,
            tally: Amount::ZERO,
            final_tally: Amount::ZERO,
            election_end: 0,
            election_duration: Duration::ZERO,
            confirmation_request_count: 0,
            block_count: 0,
            voter_count: 0,
            status_type: ElectionStatusType::Ongoing,
        }
    }

    /// Status for a block cemented without an election of its own.
    pub fn inactive(winner: Arc<Block>) -> Self {
        Self {
            election_end: milliseconds_since_epoch(),
            block_count: 1,
            status_type: ElectionStatusType::InactiveConfirmationHeight,
            ..Self::new(winner)
        }
    }
}

/// The latest vote a representative cast in an election.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteInfo {
    /// Local arrival time, used for cooldown.
    pub time: Instant,
    /// Packed vote timestamp, `Vote::TIMESTAMP_MAX` for final votes.
    pub timestamp: u64,
    pub hash: BlockHash,
}

impl VoteInfo {
    pub fn is_final(&self) -> bool {
        self.timestamp == Vote::TIMESTAMP_MAX
    }
}

/// Where a vote handed to an election came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteSource {
    Live,
    /// Replayed from the vote cache when the election started.
    Cache,
}

/// Outcome of processing one vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoteCode {
    /// Signature did not verify.
    Invalid,
    /// Older than, or equal to, what was already seen.
    Replay,
    /// Applied to at least one election.
    Vote,
    /// No election or recent confirmation for any hash.
    Indeterminate,
    /// Voter below the principal threshold.
    Ignored,
}

impl VoteCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Replay => "replay",
            Self::Vote => "vote",
            Self::Indeterminate => "indeterminate",
            Self::Ignored => "ignored",
        }
    }
}

/// Everything guarded by the election mutex.
pub struct ElectionData {
    pub status: ElectionStatus,
    pub state: ElectionState,
    pub state_start: Instant,
    pub last_blocks: HashMap<BlockHash, Arc<Block>>,
    pub last_votes: HashMap<Account, VoteInfo>,
    pub last_tally: HashMap<BlockHash, Amount>,
    /// Final-vote weight behind the current leader.
    pub final_weight: Amount,
    pub last_block: Option<Instant>,
    pub last_req: Option<Instant>,
    pub last_vote: Option<Instant>,
}

impl ElectionData {
    pub fn winner_hash(&self) -> BlockHash {
        self.status.winner.hash()
    }
}

pub struct Election {
    pub id: u64,
    pub qualified_root: QualifiedRoot,
    pub root: Root,
    pub behavior: ElectionBehavior,
    pub election_start: Instant,
    /// Balance before the first block, when the caller knew it.
    pub previous_balance: Option<Amount>,
    base_latency: Duration,
    confirmation_action: Option<ConfirmationAction>,
    is_quorum: AtomicBool,
    confirmation_request_count: AtomicU32,
    data: Mutex<ElectionData>,
}

impl Election {
    pub fn new(
        id: u64,
        block: Arc<Block>,
        behavior: ElectionBehavior,
        previous_balance: Option<Amount>,
        confirmation_action: Option<ConfirmationAction>,
        now: Instant,
        base_latency: Duration,
    ) -> Self {
        let hash = block.hash();
        let mut last_votes = HashMap::new();
        // Keeps the initial block present in every tally.
        last_votes.insert(
            Account::ZERO,
            VoteInfo {
                time: now,
                timestamp: 0,
                hash,
            },
        );
        let mut last_blocks = HashMap::new();
        last_blocks.insert(hash, Arc::clone(&block));

        Self {
            id,
            qualified_root: block.qualified_root(),
            root: block.root(),
            behavior,
            election_start: now,
            previous_balance,
            base_latency,
            confirmation_action,
            is_quorum: AtomicBool::new(false),
            confirmation_request_count: AtomicU32::new(0),
            data: Mutex::new(ElectionData {
                status: ElectionStatus::new(block),
                state: ElectionState::Passive,
                state_start: now,
                last_blocks,
                last_votes,
                last_tally: HashMap::new(),
                final_weight: Amount::ZERO,
                last_block: None,
                last_req: None,
                last_vote: None,
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, ElectionData> {
        self.data.lock().unwrap()
    }

    /// Move from `expected` to `desired`. Fails if another thread changed
    /// the state first or the transition is not allowed.
    pub fn state_change(
        &self,
        data: &mut ElectionData,
        expected: ElectionState,
        desired: ElectionState,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        if data.state != expected {
            return Err(ConsensusError::StateMismatch {
                expected,
                found: data.state,
            });
        }
        if !expected.can_transition_to(desired) {
            return Err(ConsensusError::InvalidTransition {
                from: expected,
                to: desired,
            });
        }
        data.state = desired;
        data.state_start = now;
        Ok(())
    }

    /// Skip the passive phase. Returns false when the election was already
    /// past it.
    pub fn transition_active(&self, now: Instant) -> bool {
        let mut data = self.lock();
        if data.state != ElectionState::Passive {
            return false;
        }
        let changed = self.state_change(&mut data, ElectionState::Passive, ElectionState::Active, now);
        debug_assert!(changed.is_ok());
        changed.is_ok()
    }

    pub fn state(&self) -> ElectionState {
        self.lock().state
    }

    pub fn confirmed(&self) -> bool {
        self.lock().state.is_confirmed()
    }

    pub fn failed(&self) -> bool {
        self.lock().state == ElectionState::ExpiredUnconfirmed
    }

    pub fn status(&self) -> ElectionStatus {
        self.lock().status.clone()
    }

    pub fn winner(&self) -> Arc<Block> {
        Arc::clone(&self.lock().status.winner)
    }

    pub fn votes(&self) -> HashMap<Account, VoteInfo> {
        self.lock().last_votes.clone()
    }

    pub fn blocks(&self) -> HashMap<BlockHash, Arc<Block>> {
        self.lock().last_blocks.clone()
    }

    pub fn tally_snapshot(&self) -> HashMap<BlockHash, Amount> {
        self.lock().last_tally.clone()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.lock().last_blocks.contains_key(hash)
    }

    pub fn vote_count(&self) -> usize {
        self.lock().last_votes.len()
    }

    /// Final-vote weight behind the leader as of the last tally.
    pub fn final_weight(&self) -> Amount {
        self.lock().final_weight
    }

    pub fn is_quorum(&self) -> bool {
        self.is_quorum.load(Ordering::SeqCst)
    }

    /// Set the quorum flag, returning the previous value.
    pub(crate) fn set_quorum(&self) -> bool {
        self.is_quorum.swap(true, Ordering::SeqCst)
    }

    pub fn confirmation_request_count(&self) -> u32 {
        self.confirmation_request_count.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_confirmation_request_count(&self) {
        self.confirmation_request_count.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn confirmation_action(&self) -> Option<&ConfirmationAction> {
        self.confirmation_action.as_ref()
    }

    pub fn base_latency(&self) -> Duration {
        self.base_latency
    }

    pub fn time_to_live(&self) -> Duration {
        match self.behavior {
            ElectionBehavior::Optimistic => OPTIMISTIC_TIME_TO_LIVE,
            ElectionBehavior::Normal | ElectionBehavior::Manual => NORMAL_TIME_TO_LIVE,
        }
    }

    /// Minimum gap between confirmation requests.
    pub fn confirm_req_time(&self) -> Duration {
        match self.behavior {
            ElectionBehavior::Optimistic => self.base_latency * 10,
            ElectionBehavior::Normal | ElectionBehavior::Manual => self.base_latency * 5,
        }
    }

    /// How long a representative must wait before a live vote may replace
    /// its previous one. Heavier representatives get a shorter cooldown.
    pub fn cooldown_time(weight: Amount, trended: Amount) -> Duration {
        if weight >= trended.scaled(1, 20) {
            Duration::from_secs(1)
        } else if weight >= trended.scaled(1, 100) {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(15)
        }
    }
}

impl fmt::Debug for Election {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Election")
            .field("id", &self.id)
            .field("qualified_root", &self.qualified_root)
            .field("behavior", &self.behavior)
            .finish_non_exhaustive()
    }
}
