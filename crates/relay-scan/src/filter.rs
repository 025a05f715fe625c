//! Event filters and their `eth_getLogs` JSON form.

use serde_json::{json, Value};

use crate::abi::{Address, ContractAbi};
use crate::block::to_quantity;
use crate::error::ScanError;

/// Topics an EVM log can carry: the event topic plus three indexed arguments.
pub const MAX_TOPICS: usize = 4;

/// Provider-side log query: contract address, event topic and optional indexed-argument topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    event_name: String,
    address: Option<Address>,
    /// Position 0 is the event topic; `None` matches anything at that position.
    topics: Vec<Option<Vec<[u8; 32]>>>,
}

impl EventFilter {
    /// Filter named `event_name` with no address or topic constraints yet.
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            address: None,
            topics: Vec::new(),
        }
    }

    /// Filter for `event_name` on `contract`; fails when the ABI has no such event.
    pub fn for_event(contract: &ContractAbi, event_name: &str) -> Result<Self, ScanError> {
        let event = contract.event(event_name)?;
        let filter = Self::new(event_name).address(contract.address);
        if event.anonymous {
            Ok(filter)
        } else {
            filter.topic(0, event.topic0)
        }
    }

    #[must_use]
    pub fn address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Constrain topic `index` to `value` (OR-ed with earlier values at the same index).
    /// Logs carry at most [`MAX_TOPICS`] topics, so larger indices are rejected.
    pub fn topic(mut self, index: usize, value: [u8; 32]) -> Result<Self, ScanError> {
        if index >= MAX_TOPICS {
            return Err(ScanError::InvalidTopic { index });
        }
        if self.topics.len() <= index {
            self.topics.resize(index + 1, None);
        }
        self.topics[index].get_or_insert_with(Vec::new).push(value);
        Ok(self)
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn contract_address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    /// `eth_getLogs` filter object for the inclusive range `[from, to]`.
    pub fn to_json(&self, from: u64, to: u64) -> Value {
        let mut filter = json!({
            "fromBlock": to_quantity(from),
            "toBlock": to_quantity(to),
        });
        if let Some(address) = &self.address {
            filter["address"] = Value::String(format!("0x{}", hex::encode(address)));
        }
        // Trailing wildcards are dropped; some nodes reject [topic0, null, null, null].
        let used = self.topics.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
        if used > 0 {
            let topics = self.topics[..used]
                .iter()
                .map(|slot| match slot {
                    None => Value::Null,
                    Some(values) if values.len() == 1 => hex_word(&values[0]),
                    Some(values) => Value::Array(values.iter().map(hex_word).collect()),
                })
                .collect();
            filter["topics"] = Value::Array(topics);
        }
        filter
    }
}

fn hex_word(word: &[u8; 32]) -> Value {
    Value::String(format!("0x{}", hex::encode(word)))
}
