//! Vote cache: votes that arrive before their election exists.
//!
//! Votes can arrive out of order. A representative might broadcast a vote
//! for a block before this node has seen the conflicting fork. The cache
//! holds such "inactive" votes so they can be replayed into the election
//! once it starts, and so `replace_by_weight` can tell whether an unseen
//! fork variant already has support.
//!
//! - per-voter deduplication (a newer timestamp replaces the older vote)
//! - running tallies per hash, with a separate final tally
//! - a per-hash voter limit that evicts the lightest voter
//! - age-based expiry through a time index

use orv_messages::Vote;
use orv_types::{Account, Amount, BlockHash};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::VoteCacheConfig;

struct CachedVote {
    vote: Arc<Vote>,
    weight: Amount,
    arrived: Instant,
}

impl CachedVote {
    fn voter(&self) -> Account {
        self.vote.voting_account
    }
}

struct CacheEntry {
    votes: Vec<CachedVote>,
    tally: Amount,
    final_tally: Amount,
}

impl CacheEntry {
    fn recount(&mut self) {
        self.tally = self.votes.iter().map(|v| v.weight).sum();
        self.final_tally = self
            .votes
            .iter()
            .filter(|v| v.vote.is_final())
            .map(|v| v.weight)
            .sum();
    }
}

/// Pre-election vote storage keyed by block hash.
///
/// When an election starts for a hash, the cached votes are replayed into
/// it. Entries are removed when the election for the hash ends.
pub struct VoteCache {
    config: VoteCacheConfig,
    entries: HashMap<BlockHash, CacheEntry>,
    /// Arrival instant → hashes that received votes at that time, so expiry
    /// only inspects entries old enough to hold stale votes.
    time_index: BTreeMap<Instant, Vec<BlockHash>>,
}

impl VoteCache {
    pub fn new(config: VoteCacheConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            time_index: BTreeMap::new(),
        }
    }

    /// Cache `vote` for `hash`, weighted with the voter's current weight.
    /// Returns true if the cache changed.
    pub fn insert(&mut self, hash: BlockHash, vote: &Arc<Vote>, weight: Amount) -> bool {
        if self.entries.len() >= self.config.max_size && !self.entries.contains_key(&hash) {
            self.cleanup();
            if self.entries.len() >= self.config.max_size {
                return false;
            }
        }

        let now = Instant::now();
        let entry = self.entries.entry(hash).or_insert_with(|| CacheEntry {
            votes: Vec::new(),
            tally: Amount::ZERO,
            final_tally: Amount::ZERO,
        });

        if let Some(existing) = entry
            .votes
            .iter_mut()
            .find(|v| v.voter() == vote.voting_account)
        {
            if vote.timestamp() <= existing.vote.timestamp() {
                return false;
            }
            existing.vote = Arc::clone(vote);
            existing.weight = weight;
            existing.arrived = now;
            entry.recount();
            self.time_index.entry(now).or_default().push(hash);
            return true;
        }

        if entry.votes.len() >= self.config.max_voters {
            let lightest = entry
                .votes
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| v.weight)
                .map(|(i, v)| (i, v.weight));
            match lightest {
                Some((index, lightest_weight)) if weight > lightest_weight => {
                    entry.votes.remove(index);
                }
                _ => return false,
            }
        }

        entry.votes.push(CachedVote {
            vote: Arc::clone(vote),
            weight,
            arrived: now,
        });
        entry.recount();
        self.time_index.entry(now).or_default().push(hash);
        true
    }

    /// Cached votes for `hash`, left in place.
    pub fn find(&self, hash: &BlockHash) -> Vec<Arc<Vote>> {
        self.entries
            .get(hash)
            .map(|e| e.votes.iter().map(|v| Arc::clone(&v.vote)).collect())
            .unwrap_or_default()
    }

    pub fn erase(&mut self, hash: &BlockHash) -> bool {
        self.entries.remove(hash).is_some()
    }

    /// Cached weight for `hash`.
    pub fn tally(&self, hash: &BlockHash) -> Amount {
        self.entries
            .get(hash)
            .map(|e| e.tally)
            .unwrap_or(Amount::ZERO)
    }

    /// Cached weight of final votes for `hash`.
    pub fn final_tally(&self, hash: &BlockHash) -> Amount {
        self.entries
            .get(hash)
            .map(|e| e.final_tally)
            .unwrap_or(Amount::ZERO)
    }

    /// The `n` hashes with most cached weight, heaviest first.
    pub fn top(&self, n: usize) -> Vec<(BlockHash, Amount)> {
        let mut entries: Vec<(BlockHash, Amount)> = self
            .entries
            .iter()
            .map(|(hash, entry)| (*hash, entry.tally))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        entries.truncate(n);
        entries
    }

    /// Drop votes older than the configured age cutoff.
    pub fn cleanup(&mut self) {
        let age = Duration::from_secs(self.config.age_cutoff_secs);
        let Some(cutoff) = Instant::now().checked_sub(age) else {
            return;
        };

        let expired_keys: Vec<Instant> =
            self.time_index.range(..=cutoff).map(|(k, _)| *k).collect();
        let mut candidates = HashSet::new();
        for key in &expired_keys {
            if let Some(hashes) = self.time_index.remove(key) {
                candidates.extend(hashes);
            }
        }

        for hash in candidates {
            let remove_entry = match self.entries.get_mut(&hash) {
                Some(entry) => {
                    entry.votes.retain(|v| v.arrived > cutoff);
                    entry.recount();
                    entry.votes.is_empty()
                }
                None => false,
            };
            if remove_entry {
                self.entries.remove(&hash);
            }
        }
    }

    /// Number of distinct hashes with cached votes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Individual cached votes across all hashes.
    pub fn total_votes(&self) -> usize {
        self.entries.values().map(|e| e.votes.len()).sum()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.time_index.clear();
    }
}

impl Default for VoteCache {
    fn default() -> Self {
        Self::new(VoteCacheConfig::default())
    }
}
