//! Recently-confirmed elections, which keeps late votes and re-published
//! blocks from restarting elections that have just finished.
//!
//! This is a bounded FIFO ring indexed both by qualified root and by winner
//! hash. When full, the oldest entry is evicted to make room for a new one.
//! It carries its own mutex and never takes another lock while holding it.

use orv_types::{BlockHash, QualifiedRoot};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
struct Ring {
    order: VecDeque<(QualifiedRoot, BlockHash)>,
    by_root: HashMap<QualifiedRoot, BlockHash>,
    by_hash: HashMap<BlockHash, QualifiedRoot>,
}

pub struct RecentlyConfirmed {
    ring: Mutex<Ring>,
    capacity: usize,
}

impl RecentlyConfirmed {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring::default()),
            capacity,
        }
    }

    /// Record a confirmed winner. Returns false if the root or hash is
    /// already present.
    pub fn put(&self, root: QualifiedRoot, hash: BlockHash) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let mut ring = self.ring.lock().unwrap();
        if ring.by_root.contains_key(&root) || ring.by_hash.contains_key(&hash) {
            return false;
        }
        if ring.order.len() >= self.capacity {
            if let Some((old_root, old_hash)) = ring.order.pop_front() {
                ring.by_root.remove(&old_root);
                ring.by_hash.remove(&old_hash);
            }
        }
        ring.order.push_back((root, hash));
        ring.by_root.insert(root, hash);
        ring.by_hash.insert(hash, root);
        true
    }

    pub fn erase(&self, hash: &BlockHash) {
        let mut ring = self.ring.lock().unwrap();
        if let Some(root) = ring.by_hash.remove(hash) {
            ring.by_root.remove(&root);
            ring.order.retain(|(_, h)| h != hash);
        }
    }

    pub fn exists(&self, hash: &BlockHash) -> bool {
        self.ring.lock().unwrap().by_hash.contains_key(hash)
    }

    pub fn root_exists(&self, root: &QualifiedRoot) -> bool {
        self.ring.lock().unwrap().by_root.contains_key(root)
    }

    /// Most recent entry, if any.
    pub fn back(&self) -> Option<(QualifiedRoot, BlockHash)> {
        self.ring.lock().unwrap().order.back().copied()
    }

    pub fn clear(&self) {
        *self.ring.lock().unwrap() = Ring::default();
    }

    pub fn len(&self) -> usize {
        self.ring.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
