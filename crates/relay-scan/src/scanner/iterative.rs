//! Newest-to-oldest sub-window walk over one block range.

use tracing::Instrument;

use super::{EventScanner, ScanOutcome};
use crate::abi::EventRecord;
use crate::block::{reaches_tip, BlockRange, BlockTag};
use crate::error::ScanError;
use crate::filter::EventFilter;
use crate::resilient;
use crate::transport::Transport;

impl<T: Transport + ?Sized> EventScanner<'_, T> {
    /// Scan `[from, to]` in windows of at most `step_size` blocks, newest first, stopping at the
    /// first window that yields events.
    pub async fn scan(&self, filter: &EventFilter, from: BlockTag, to: BlockTag) -> ScanOutcome {
        let span = self.span("iterative", filter);
        self.scan_iterative(filter, from, to).instrument(span).await.into()
    }

    pub(super) async fn scan_iterative(
        &self,
        filter: &EventFilter,
        from: BlockTag,
        to: BlockTag,
    ) -> Result<Vec<EventRecord>, ScanError> {
        let latest = resilient::block_number(self.transport, &self.policy).await?;
        let range = BlockRange::resolve(from, to, latest);
        if to.is_latest() {
            tracing::trace!(to_block = range.to, "iterative scan up to latest block + 1");
        }
        if range.is_empty() {
            tracing::debug!(%range, "empty block range, nothing to scan");
            return Ok(Vec::new());
        }

        let step = self.config.step_size;
        if !self.config.iterative_enabled() {
            tracing::warn!(%range, "iterative scan disabled, scanning the whole range at once");
            return self.scan_once(filter, range).await;
        }
        if range.is_full_history()
            && reaches_tip(to, latest)
            && latest.div_ceil(step) > self.config.max_steps
        {
            tracing::warn!(
                %range,
                step,
                max_steps = self.config.max_steps,
                "full range needs too many steps, scanning it at once"
            );
            return self.scan_once(filter, range).await;
        }

        tracing::trace!(%range, step, "iterative scan");
        let mut sub_to = range.to;
        loop {
            let window = BlockRange {
                from: range.from.max(sub_to.saturating_sub(step)),
                to: sub_to,
            };
            tracing::trace!(%window, %range, "scanning sub-range");
            match resilient::logs(self.transport, &self.policy, filter, window).await {
                Ok(events) if !events.is_empty() => {
                    tracing::info!(%window, %range, count = events.len(), "found events");
                    if tracing::enabled!(tracing::Level::DEBUG) {
                        let blocks: Vec<u64> = events.iter().map(|e| e.block_number).collect();
                        tracing::debug!(?blocks, "event blocks");
                    }
                    return Ok(events);
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(critical = true, %window, reason = %e, "sub-range scan failed");
                }
            }
            sub_to = window.from;
            if sub_to <= range.from {
                break;
            }
        }
        tracing::debug!(%range, "no events in block range");
        Ok(Vec::new())
    }

    async fn scan_once(
        &self,
        filter: &EventFilter,
        range: BlockRange,
    ) -> Result<Vec<EventRecord>, ScanError> {
        resilient::logs(self.transport, &self.policy, filter, range).await
    }
}
