//! Recent-first planning for full-history scans.
//!
//! Candidate windows end at the chain tip and start one day, week, month, year and three years
//! back (at the configured blocks-per-minute). Windows that would start before genesis are
//! dropped, and the plan always ends with the entire history.

use tracing::Instrument;

use super::{EventScanner, ScanOutcome};
use crate::abi::EventRecord;
use crate::block::{reaches_tip, BlockTag};
use crate::error::ScanError;
use crate::filter::EventFilter;
use crate::resilient;
use crate::transport::Transport;

pub const ENTIRE_RANGE_LABEL: &str = "entire block range";

/// One candidate window of a progressive plan; always ends at `latest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPlanAtom {
    pub from_block: u64,
    pub to_block: BlockTag,
    pub label: &'static str,
}

impl ScanPlanAtom {
    fn entire_range() -> Self {
        Self {
            from_block: 0,
            to_block: BlockTag::Latest,
            label: ENTIRE_RANGE_LABEL,
        }
    }
}

/// Plan for a chain whose resolved upper bound is `latest_plus_one`.
pub fn progressive_scan_plan(latest_plus_one: u64, blocks_per_minute: u64) -> Vec<ScanPlanAtom> {
    let day = blocks_per_minute.saturating_mul(60 * 24);
    let year = day.saturating_mul(366);
    let spans = [
        ("1 day", day),
        ("1 week", day.saturating_mul(7)),
        ("1 month", day.saturating_mul(31)),
        ("1 year", year),
        ("3 years", year.saturating_mul(3)),
    ];

    let mut plan: Vec<ScanPlanAtom> = spans
        .iter()
        .filter_map(|&(label, span)| {
            latest_plus_one.checked_sub(span).map(|from_block| ScanPlanAtom {
                from_block,
                to_block: BlockTag::Latest,
                label,
            })
        })
        .collect();
    if plan.last().map_or(true, |atom| atom.from_block != 0) {
        plan.push(ScanPlanAtom::entire_range());
    }
    plan
}

impl<T: Transport + ?Sized> EventScanner<'_, T> {
    /// Full-history scans (`from == 0`, `to` at the tip) try the plan's windows in order and
    /// return the first non-empty result. Narrower ranges go straight to the iterative scan.
    pub async fn plan_and_scan(
        &self,
        filter: &EventFilter,
        from: BlockTag,
        to: BlockTag,
    ) -> ScanOutcome {
        let span = self.span("progressive", filter);
        self.scan_progressive(filter, from, to).instrument(span).await.into()
    }

    async fn scan_progressive(
        &self,
        filter: &EventFilter,
        from: BlockTag,
        to: BlockTag,
    ) -> Result<Vec<EventRecord>, ScanError> {
        if !self.config.progressive {
            tracing::warn!(%from, %to, "progressive scan disabled, using iterative scan");
            return self.scan_iterative(filter, from, to).await;
        }
        let latest = resilient::block_number(self.transport, &self.policy).await?;
        if !(from == BlockTag::Number(0) && reaches_tip(to, latest)) {
            tracing::trace!(%from, %to, "not a full-history scan, skipping progressive plan");
            return self.scan_iterative(filter, from, to).await;
        }

        let plan = progressive_scan_plan(latest.saturating_add(1), self.config.blocks_per_minute);
        tracing::trace!(latest, ?plan, "progressive scan plan");
        let mut last = ScanPlanAtom::entire_range();
        for atom in plan {
            tracing::trace!(from_block = atom.from_block, label = atom.label, "progressive window");
            match self.scan_iterative(filter, BlockTag::Number(atom.from_block), atom.to_block).await {
                Ok(events) if !events.is_empty() => {
                    tracing::info!(
                        from_block = atom.from_block,
                        label = atom.label,
                        count = events.len(),
                        "progressive scan found events"
                    );
                    return Ok(events);
                }
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::debug!(label = atom.label, reason = %e, "progressive window failed");
                }
            }
            last = atom;
        }
        tracing::error!(
            event = filter.event_name(),
            from_block = last.from_block,
            to_block = %last.to_block,
            label = last.label,
            "could not find event using progressive scan"
        );
        Ok(Vec::new())
    }
}
