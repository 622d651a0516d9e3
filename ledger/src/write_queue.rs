//! Cooperative single-writer admission gate.
//!
//! Every component that writes to the ledger in bulk takes a [`WriteGuard`]
//! first. Writers are admitted strictly in arrival order; the guard releases
//! the slot when dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Writer {
    ConfirmationHeight,
    BlockProcessor,
    Testing,
}

#[derive(Default)]
struct Queue {
    next_ticket: u64,
    waiting: VecDeque<(u64, Writer)>,
}

#[derive(Clone, Default)]
pub struct WriteQueue {
    inner: Arc<(Mutex<Queue>, Condvar)>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `writer` is at the front of the queue.
    pub fn wait(&self, writer: Writer) -> WriteGuard {
        let (mutex, condvar) = &*self.inner;
        let mut queue = mutex.lock().unwrap();
        let ticket = queue.next_ticket;
        queue.next_ticket += 1;
        queue.waiting.push_back((ticket, writer));
        let _queue = condvar
            .wait_while(queue, |q| q.waiting.front().map(|(t, _)| *t) != Some(ticket))
            .unwrap();
        trace!(?writer, "write slot granted");
        WriteGuard {
            inner: Arc::clone(&self.inner),
            writer,
        }
    }

    /// Whether `writer` holds or is waiting for the slot.
    pub fn contains(&self, writer: Writer) -> bool {
        let queue = self.inner.0.lock().unwrap();
        queue.waiting.iter().any(|(_, w)| *w == writer)
    }

    pub fn len(&self) -> usize {
        self.inner.0.lock().unwrap().waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proof that the holder owns the ledger write slot.
pub struct WriteGuard {
    inner: Arc<(Mutex<Queue>, Condvar)>,
    writer: Writer,
}

impl WriteGuard {
    pub fn writer(&self) -> Writer {
        self.writer
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let (mutex, condvar) = &*self.inner;
        let mut queue = mutex.lock().unwrap_or_else(|e| e.into_inner());
        queue.waiting.pop_front();
        drop(queue);
        condvar.notify_all();
    }
}
