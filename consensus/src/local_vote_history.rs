//! Votes this node generated, kept per root so they can be rebroadcast
//! without signing again.

use orv_messages::Vote;
use orv_types::{BlockHash, Root};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct History {
    by_root: HashMap<Root, Vec<(BlockHash, Arc<Vote>)>>,
    order: VecDeque<Root>,
}

pub struct LocalVoteHistory {
    history: Mutex<History>,
    max_roots: usize,
}

impl LocalVoteHistory {
    pub fn new(max_roots: usize) -> Self {
        Self {
            history: Mutex::new(History::default()),
            max_roots,
        }
    }

    /// Remember `vote` for `hash` on `root`. Votes for other hashes on the
    /// root are dropped, as is an older vote from the same account.
    pub fn add(&self, root: Root, hash: BlockHash, vote: &Arc<Vote>) {
        let mut history = self.history.lock().unwrap();
        let entries = history.by_root.entry(root).or_default();
        let fresh = entries.is_empty();
        entries.retain(|(existing_hash, existing)| {
            *existing_hash == hash
                && !(existing.voting_account == vote.voting_account
                    && existing.timestamp() <= vote.timestamp())
        });
        entries.push((hash, Arc::clone(vote)));
        if fresh {
            history.order.push_back(root);
        }
        while history.order.len() > self.max_roots {
            if let Some(oldest) = history.order.pop_front() {
                history.by_root.remove(&oldest);
            }
        }
    }

    /// Votes for `hash` on `root`; only final ones when `is_final`.
    pub fn votes(&self, root: &Root, hash: &BlockHash, is_final: bool) -> Vec<Arc<Vote>> {
        let history = self.history.lock().unwrap();
        history
            .by_root
            .get(root)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(h, vote)| h == hash && (!is_final || vote.is_final()))
                    .map(|(_, vote)| Arc::clone(vote))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn exists(&self, root: &Root) -> bool {
        self.history.lock().unwrap().by_root.contains_key(root)
    }

    pub fn erase(&self, root: &Root) {
        let mut history = self.history.lock().unwrap();
        if history.by_root.remove(root).is_some() {
            history.order.retain(|r| r != root);
        }
    }

    pub fn len(&self) -> usize {
        self.history.lock().unwrap().by_root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
