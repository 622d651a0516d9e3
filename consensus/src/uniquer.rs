//! Deduplication of structurally identical votes and blocks.
//!
//! Several peers usually relay the same vote or block. The uniquer maps a
//! content hash to a weak reference so every holder shares one allocation
//! for as long as any of them keeps it alive.

use orv_crypto::blake2b_256_multi;
use orv_messages::Vote;
use orv_types::{Block, BlockHash};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Entries inspected for dead references on each insertion.
const CLEANUP_COUNT: usize = 2;

/// A value that can be deduplicated by content.
pub trait UniqueKey {
    /// Hash over everything that distinguishes two copies, including
    /// signatures.
    fn unique_key(&self) -> BlockHash;
}

impl UniqueKey for Vote {
    fn unique_key(&self) -> BlockHash {
        self.full_hash()
    }
}

impl UniqueKey for Block {
    fn unique_key(&self) -> BlockHash {
        BlockHash::new(blake2b_256_multi(&[
            self.hash().as_bytes(),
            self.signature().as_bytes(),
        ]))
    }
}

pub struct Uniquer<T: UniqueKey> {
    entries: Mutex<HashMap<BlockHash, Weak<T>>>,
}

pub type VoteUniquer = Uniquer<Vote>;
pub type BlockUniquer = Uniquer<Block>;

impl<T: UniqueKey> Uniquer<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the shared copy of `value`, registering it if none is alive.
    pub fn unique(&self, value: &Arc<T>) -> Arc<T> {
        let key = value.unique_key();
        let mut entries = self.entries.lock().unwrap();
        let result = match entries.get(&key).and_then(Weak::upgrade) {
            Some(existing) => existing,
            None => {
                entries.insert(key, Arc::downgrade(value));
                Arc::clone(value)
            }
        };
        Self::cleanup(&mut entries);
        result
    }

    fn cleanup(entries: &mut HashMap<BlockHash, Weak<T>>) {
        let dead: Vec<BlockHash> = entries
            .iter()
            .filter(|(_, weak)| weak.strong_count() == 0)
            .take(CLEANUP_COUNT)
            .map(|(key, _)| *key)
            .collect();
        for key in dead {
            entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: UniqueKey> Default for Uniquer<T> {
    fn default() -> Self {
        Self::new()
    }
}
