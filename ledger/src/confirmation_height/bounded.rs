//! Bounded cementing: writes in batches of at most `batch_write_size` blocks,
//! releasing the write slot between batches so other writers are not starved
//! by a long chain.

use orv_types::Block;
use std::sync::Arc;
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
    notify: &mut dyn FnMut(Vec<Arc<Block>>),
) -> Result<u64, LedgerError> {
    let mut total = 0u64;
    for step in steps {
        for chunk in step.blocks.chunks(batch_write_size.max(1)) {
            let Some(top) = chunk.last().map(|b| b.hash()) else {
                continue;
            };
            let cemented = {
                let guard = write_queue.wait(Writer::ConfirmationHeight);
                ledger.confirm(&guard, &step.account, &top)?
            };
            trace!(account = %step.account, count = cemented.len(), "bounded batch written");
            total += cemented.len() as u64;
            if !cemented.is_empty() {
                notify(cemented);
            }
        }
    }
    Ok(total)
}
