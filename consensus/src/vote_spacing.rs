//! Vote spacing: keeps the local generator from flipping its vote on a root
//! faster than the configured delay.
//!
//! Re-voting for the same hash is always allowed. Voting for a different hash
//! on a root that was voted on less than `delay` ago is not.

use orv_nullables::SteadyClock;
use orv_types::{BlockHash, Root};
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct VoteSpacing {
    last_vote: HashMap<Root, (Instant, BlockHash)>,
    delay: Duration,
    clock: SteadyClock,
}

impl VoteSpacing {
    pub fn new(delay: Duration, clock: SteadyClock) -> Self {
        Self {
            last_vote: HashMap::new(),
            delay,
            clock,
        }
    }

    pub fn votable(&self, root: &Root, candidate: &BlockHash) -> bool {
        match self.last_vote.get(root) {
            None => true,
            Some((time, hash)) => {
                hash == candidate
                    || self.clock.now().saturating_duration_since(*time) >= self.delay
            }
        }
    }

    /// Record that a vote for `hash` was generated on `root`.
    pub fn flag(&mut self, root: Root, hash: BlockHash) {
        self.cleanup();
        self.last_vote.insert(root, (self.clock.now(), hash));
    }

    /// Drop entries that no longer restrict anything.
    pub fn cleanup(&mut self) {
        let now = self.clock.now();
        let delay = self.delay;
        self.last_vote
            .retain(|_, (time, _)| now.saturating_duration_since(*time) < delay);
    }

    pub fn len(&self) -> usize {
        self.last_vote.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_vote.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_root(byte: u8) -> Root {
        Root::new([byte; 32])
    }

    fn make_hash(byte: u8) -> BlockHash {
        BlockHash::new([byte; 32])
    }

    fn spacing() -> (VoteSpacing, SteadyClock) {
        let clock = SteadyClock::new_null();
        (VoteSpacing::new(Duration::from_secs(1), clock.clone()), clock)
    }

    #[test]
    fn first_vote_always_allowed() {
        let (spacing, _) = spacing();
        assert!(spacing.votable(&make_root(1), &make_hash(1)));
    }

    #[test]
    fn same_candidate_always_allowed() {
        let (mut spacing, _) = spacing();
        spacing.flag(make_root(1), make_hash(1));
        assert!(spacing.votable(&make_root(1), &make_hash(1)));
    }

    #[test]
    fn different_candidate_blocked_until_delay_passes() {
        let (mut spacing, clock) = spacing();
        spacing.flag(make_root(1), make_hash(1));
        assert!(!spacing.votable(&make_root(1), &make_hash(2)));

        clock.advance(Duration::from_millis(999));
        assert!(!spacing.votable(&make_root(1), &make_hash(2)));
        clock.advance(Duration::from_millis(1));
        assert!(spacing.votable(&make_root(1), &make_hash(2)));
    }

    #[test]
    fn roots_are_independent() {
        let (mut spacing, _) = spacing();
        spacing.flag(make_root(1), make_hash(1));
        assert!(spacing.votable(&make_root(2), &make_hash(2)));
        assert!(!spacing.votable(&make_root(1), &make_hash(2)));
    }

    #[test]
    fn flag_overwrites_previous() {
        let (mut spacing, _) = spacing();
        spacing.flag(make_root(1), make_hash(1));
        spacing.flag(make_root(1), make_hash(2));
        assert!(spacing.votable(&make_root(1), &make_hash(2)));
        assert!(!spacing.votable(&make_root(1), &make_hash(3)));
    }

    #[test]
    fn cleanup_removes_expired_entries() {
        let (mut spacing, clock) = spacing();
        spacing.flag(make_root(1), make_hash(1));
        spacing.cleanup();
        assert_eq!(spacing.len(), 1);

        clock.advance(Duration::from_secs(2));
        spacing.cleanup();
        assert!(spacing.is_empty());
    }
}
