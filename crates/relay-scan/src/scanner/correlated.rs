use tracing::Instrument;

use super::{EventScanner, ScanOutcome};
use crate::abi::{EventRecord, TxHash};
use crate::block::BlockRange;
use crate::error::ScanError;
use crate::filter::EventFilter;
use crate::resilient;
use crate::transport::Transport;

/// `[block - half_width, block + half_width]`, with the upper bound moved to `latest + 1` once it
/// reaches the chain height.
pub fn correlation_window(block: u64, half_width: u64, latest: u64) -> BlockRange {
    let from = block.saturating_sub(half_width);
    let mut to = block.saturating_add(half_width);
    if to >= latest {
        to = latest.saturating_add(1);
    }
    BlockRange { from, to }
}

impl<T: Transport + ?Sized> EventScanner<'_, T> {
    /// Events matching `filter` near `block` that were emitted by `tx_hash`.
    pub async fn events_for_transaction(
        &self,
        filter: &EventFilter,
        block: u64,
        tx_hash: &TxHash,
    ) -> ScanOutcome {
        let span = self.span("correlated", filter);
        self.scan_for_transaction(filter, block, tx_hash).instrument(span).await.into()
    }

    async fn scan_for_transaction(
        &self,
        filter: &EventFilter,
        block: u64,
        tx_hash: &TxHash,
    ) -> Result<Vec<EventRecord>, ScanError> {
        let latest = resilient::block_number(self.transport, &self.policy).await?;
        let window = correlation_window(block, self.config.correlation_window, latest);
        tracing::trace!(block, %window, tx = %hex::encode(tx_hash), "transaction-correlated lookup");
        let events = self
            .scan_iterative(filter, window.from.into(), window.to.into())
            .await?;
        let total = events.len();
        let matching: Vec<EventRecord> = events
            .into_iter()
            .filter(|e| &e.transaction_hash == tx_hash)
            .collect();
        tracing::debug!(total, matching = matching.len(), "filtered events by transaction");
        Ok(matching)
    }
}
