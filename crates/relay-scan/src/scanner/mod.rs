//! Event discovery over a [`Transport`]: iterative range splitting, progressive recent-first
//! planning and transaction-correlated lookup.
//!
//! Absence of events is never an error. Every public scan returns a [`ScanOutcome`].

mod correlated;
mod iterative;
mod progressive;

pub use correlated::correlation_window;
pub use progressive::{progressive_scan_plan, ScanPlanAtom, ENTIRE_RANGE_LABEL};

use tracing::Span;

use crate::abi::{ContractAbi, EventRecord, TxHash};
use crate::block::BlockTag;
use crate::config::{RetryPolicy, ScanConfig};
use crate::error::ScanError;
use crate::filter::EventFilter;
use crate::transport::Transport;

/// Result of one top-level scan.
#[derive(Debug)]
pub enum ScanOutcome {
    Found(Vec<EventRecord>),
    Empty,
    TransportFailure(ScanError),
}

impl ScanOutcome {
    pub fn from_events(events: Vec<EventRecord>) -> Self {
        if events.is_empty() {
            ScanOutcome::Empty
        } else {
            ScanOutcome::Found(events)
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, ScanOutcome::Found(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ScanOutcome::Empty)
    }

    /// Found events; empty for `Empty` and `TransportFailure`.
    pub fn events(&self) -> &[EventRecord] {
        match self {
            ScanOutcome::Found(events) => events,
            _ => &[],
        }
    }

    /// `Found`/`Empty` as a (possibly empty) list, `TransportFailure` as the error.
    pub fn into_result(self) -> Result<Vec<EventRecord>, ScanError> {
        match self {
            ScanOutcome::Found(events) => Ok(events),
            ScanOutcome::Empty => Ok(Vec::new()),
            ScanOutcome::TransportFailure(e) => Err(e),
        }
    }
}

impl From<Result<Vec<EventRecord>, ScanError>> for ScanOutcome {
    fn from(result: Result<Vec<EventRecord>, ScanError>) -> Self {
        match result {
            Ok(events) => ScanOutcome::from_events(events),
            Err(e) => ScanOutcome::TransportFailure(e),
        }
    }
}

/// Scans one endpoint with a fixed [`ScanConfig`] and [`RetryPolicy`].
///
/// Borrows the transport so a single socket can serve many sequential scans; the transport must
/// outlive every scan built on it.
pub struct EventScanner<'a, T: ?Sized> {
    transport: &'a T,
    config: ScanConfig,
    policy: RetryPolicy,
    log_prefix: Option<String>,
}

impl<'a, T: Transport + ?Sized> EventScanner<'a, T> {
    pub fn new(transport: &'a T) -> Self {
        Self {
            transport,
            config: ScanConfig::default(),
            policy: RetryPolicy::default(),
            log_prefix: None,
        }
    }

    #[must_use]
    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Prefix recorded on the span of every scan, e.g. the transfer direction.
    #[must_use]
    pub fn log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = Some(prefix.into());
        self
    }

    fn span(&self, mode: &'static str, filter: &EventFilter) -> Span {
        tracing::info_span!(
            "scan",
            mode,
            prefix = self.log_prefix.as_deref().unwrap_or(""),
            event = filter.event_name(),
            url = %self.transport.url(),
        )
    }

    /// Events `event` of `contract` emitted by `tx_hash` around `block`.
    ///
    /// `topics` pins indexed arguments as `(topic position, value)`; position 0 is the event
    /// topic itself; positions past the fourth topic fail with `InvalidTopic`. An event missing
    /// from the ABI yields `Empty`.
    pub async fn contract_call_events(
        &self,
        contract: &ContractAbi,
        event: &str,
        block: u64,
        tx_hash: &TxHash,
        topics: &[(usize, [u8; 32])],
    ) -> ScanOutcome {
        match contract_filter(contract, event, topics) {
            Ok(filter) => self.events_for_transaction(&filter, block, tx_hash).await,
            Err(e) => undefined_event_outcome(e),
        }
    }

    /// Full-history discovery of `event` on `contract`, recent windows first.
    pub async fn past_events_progressive(
        &self,
        contract: &ContractAbi,
        event: &str,
        from: BlockTag,
        to: BlockTag,
        topics: &[(usize, [u8; 32])],
    ) -> ScanOutcome {
        match contract_filter(contract, event, topics) {
            Ok(filter) => self.plan_and_scan(&filter, from, to).await,
            Err(e) => undefined_event_outcome(e),
        }
    }
}

fn contract_filter(
    contract: &ContractAbi,
    event: &str,
    topics: &[(usize, [u8; 32])],
) -> Result<EventFilter, ScanError> {
    let filter = EventFilter::for_event(contract, event)?;
    topics
        .iter()
        .try_fold(filter, |f, (index, value)| f.topic(*index, *value))
}

fn undefined_event_outcome(err: ScanError) -> ScanOutcome {
    if err.is_event_not_defined() {
        tracing::warn!(reason = %err, "skipping scan for event missing from the contract ABI");
        ScanOutcome::Empty
    } else {
        ScanOutcome::TransportFailure(err)
    }
}
