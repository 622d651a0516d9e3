//! Unbounded cementing: keeps the whole dependency set in memory and writes it
//! under one write slot. The slot is only released early when a pass has run
//! longer than the minimum separate-batch time and at least one full batch is
//! written.

use orv_types::Block;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

use super::walker::CementStep;
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::write_queue::{WriteQueue, Writer};

pub(crate) fn cement(
    ledger: &Ledger,
    write_queue: &WriteQueue,
    steps: &[CementStep],
    batch_write_size: usize,
    min_batch_time: Duration,
    notify: &mut dyn FnMut(Vec<Arc<Block>>),
) -> Result<u64, LedgerError> {
    let mut written: Vec<Arc<Block>> = Vec::new();
    let mut total = 0u64;
    let mut guard = write_queue.wait(Writer::ConfirmationHeight);
    let mut started = Instant::now();

    for step in steps {
        let Some(top) = step.top() else {
            continue;
        };
        let cemented = ledger.confirm(&guard, &step.account, &top)?;
        total += cemented.len() as u64;
        written.extend(cemented);

        if written.len() >= batch_write_size && started.elapsed() >= min_batch_time {
            drop(guard);
            trace!(count = written.len(), "unbounded pass yielding write slot");
            notify(std::mem::take(&mut written));
            guard = write_queue.wait(Writer::ConfirmationHeight);
            started = Instant::now();
        }
    }
    drop(guard);

    if !written.is_empty() {
        notify(written);
    }
    Ok(total)
}
