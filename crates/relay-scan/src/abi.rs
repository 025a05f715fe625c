//! Contract event metadata and log decoding.
//!
//! Event topic0 is computed from the canonical signature in a JSON ABI. Logs are decoded from the
//! JSON-RPC log shape returned by `eth_getLogs`.

use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;

use crate::error::ScanError;

pub type Address = [u8; 20];
pub type TxHash = [u8; 32];

/// keccak-256 of `data`.
pub fn keccak256(data: impl AsRef<[u8]>) -> [u8; 32] {
    Keccak256::digest(data.as_ref()).into()
}

/// One event log as returned by the node. Owned by the caller once returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub address: Address,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub transaction_hash: TxHash,
    pub log_index: u64,
}

impl EventRecord {
    pub fn topic0(&self) -> Option<&[u8; 32]> {
        self.topics.first()
    }
}

/// Decode a JSON-RPC log (`eth_getLogs` result entry) into an [`EventRecord`].
pub fn decode_log(log: &Value) -> Result<EventRecord, ScanError> {
    let field = |name: &'static str| {
        log.get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ScanError::Decode(format!("missing {name}")))
    };
    let block_number = parse_hex_u64(field("blockNumber")?)?;
    let transaction_hash = parse_hex_bytes_32(field("transactionHash")?)?;
    let log_index = match log.get("logIndex").and_then(|v| v.as_str()) {
        Some(s) => parse_hex_u64(s)?,
        None => 0,
    };
    let address = parse_address(field("address")?)?;
    let data = match log.get("data").and_then(|v| v.as_str()) {
        Some(s) => parse_hex_bytes(s)?,
        None => Vec::new(),
    };
    let topics = log
        .get("topics")
        .and_then(|t| t.as_array())
        .ok_or_else(|| ScanError::Decode("missing topics".into()))?
        .iter()
        .map(|t| {
            t.as_str()
                .ok_or_else(|| ScanError::Decode("topic not a string".into()))
                .and_then(parse_hex_bytes_32)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(EventRecord {
        address,
        topics,
        data,
        block_number,
        transaction_hash,
        log_index,
    })
}

/// Event entry from a contract ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAbi {
    pub name: String,
    /// Canonical signature, e.g. `Transfer(address,address,uint256)`.
    pub signature: String,
    pub topic0: [u8; 32],
    pub anonymous: bool,
}

/// Address plus the events its ABI declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractAbi {
    pub address: Address,
    events: BTreeMap<String, EventAbi>,
}

impl ContractAbi {
    /// Build from a JSON ABI array (only `"type": "event"` entries are kept).
    pub fn from_json(address: Address, abi: &Value) -> Result<Self, ScanError> {
        let entries = abi
            .as_array()
            .ok_or_else(|| ScanError::Decode("ABI is not an array".into()))?;
        let mut events = BTreeMap::new();
        for entry in entries {
            if entry.get("type").and_then(|t| t.as_str()) != Some("event") {
                continue;
            }
            let name = entry
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| ScanError::Decode("event without name".into()))?;
            let inputs = entry
                .get("inputs")
                .and_then(|i| i.as_array())
                .map(Vec::as_slice)
                .unwrap_or_default();
            let types = inputs.iter().map(canonical_type).collect::<Result<Vec<_>, _>>()?;
            let signature = format!("{}({})", name, types.join(","));
            let anonymous = entry.get("anonymous").and_then(|a| a.as_bool()).unwrap_or(false);
            events.insert(
                name.to_string(),
                EventAbi {
                    name: name.to_string(),
                    topic0: keccak256(signature.as_bytes()),
                    signature,
                    anonymous,
                },
            );
        }
        Ok(Self { address, events })
    }

    /// Look up an event by name.
    pub fn event(&self, name: &str) -> Result<&EventAbi, ScanError> {
        self.events
            .get(name)
            .ok_or_else(|| ScanError::EventNotDefined { event: name.to_string() })
    }

    pub fn events(&self) -> impl Iterator<Item = &EventAbi> {
        self.events.values()
    }
}

fn canonical_type(input: &Value) -> Result<String, ScanError> {
    let ty = input
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ScanError::Decode("ABI input without type".into()))?;
    match ty.strip_prefix("tuple") {
        Some(suffix) => {
            let components = input
                .get("components")
                .and_then(|c| c.as_array())
                .ok_or_else(|| ScanError::Decode("tuple without components".into()))?;
            let inner = components.iter().map(canonical_type).collect::<Result<Vec<_>, _>>()?;
            Ok(format!("({}){}", inner.join(","), suffix))
        }
        None => Ok(ty.to_string()),
    }
}

pub fn parse_hex_u64(s: &str) -> Result<u64, ScanError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| ScanError::Decode(format!("parse hex u64: {e}")))
}

pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, ScanError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| ScanError::Decode(format!("parse hex bytes: {e}")))
}

pub fn parse_hex_bytes_32(s: &str) -> Result<[u8; 32], ScanError> {
    let bytes = parse_hex_bytes(s)?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| ScanError::Decode(format!("expected 32 bytes, got {}", b.len())))
}

/// Parse a 20-byte address, also accepting a 32-byte left-padded topic word.
pub fn parse_address(s: &str) -> Result<Address, ScanError> {
    let bytes = parse_hex_bytes(s)?;
    let tail = match bytes.len() {
        20 => &bytes[..],
        32 => &bytes[12..],
        n => {
            return Err(ScanError::Decode(format!(
                "expected 20 or 32 bytes for address, got {n}"
            )))
        }
    };
    let mut out = [0u8; 20];
    out.copy_from_slice(tail);
    Ok(out)
}

/// Parse a transaction hash from `0x`-prefixed hex.
pub fn parse_tx_hash(s: &str) -> Result<TxHash, ScanError> {
    parse_hex_bytes_32(s)
}
