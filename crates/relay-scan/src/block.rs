//! Block bounds and their resolution against the current chain height.

use std::fmt;
use std::str::FromStr;

use crate::error::ScanError;

/// One bound of a block range: a concrete height or the moving chain tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
    Number(u64),
    Latest,
}

impl BlockTag {
    /// "latest" resolves one past the current height so blocks mined mid-scan stay covered.
    pub fn resolve(self, current_height: u64) -> u64 {
        match self {
            BlockTag::Number(n) => n,
            BlockTag::Latest => current_height.saturating_add(1),
        }
    }

    pub fn is_latest(self) -> bool {
        matches!(self, BlockTag::Latest)
    }
}

impl From<u64> for BlockTag {
    fn from(n: u64) -> Self {
        BlockTag::Number(n)
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Number(n) => write!(f, "{n}"),
            BlockTag::Latest => f.write_str("latest"),
        }
    }
}

impl FromStr for BlockTag {
    type Err = ScanError;

    /// Accepts `latest`, decimal, or `0x`-prefixed hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("latest") {
            return Ok(BlockTag::Latest);
        }
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse::<u64>(),
        };
        parsed
            .map(BlockTag::Number)
            .map_err(|e| ScanError::RangeResolution(format!("bad block bound {s:?}: {e}")))
    }
}

/// Inclusive, resolved block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// Resolve both bounds at `current_height`.
    pub fn resolve(from: BlockTag, to: BlockTag, current_height: u64) -> Self {
        Self {
            from: from.resolve(current_height),
            to: to.resolve(current_height),
        }
    }

    /// `from > to` after resolution: nothing to scan.
    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    pub fn is_full_history(&self) -> bool {
        self.from == 0
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}/0x{:x}", self.from, self.to)
    }
}

/// Whether `to` reaches the chain tip: the `latest` tag, or an explicit height at or past it.
pub fn reaches_tip(to: BlockTag, current_height: u64) -> bool {
    match to {
        BlockTag::Latest => true,
        BlockTag::Number(n) => n >= current_height,
    }
}

/// Encode a block height as a JSON-RPC quantity.
pub fn to_quantity(n: u64) -> String {
    format!("0x{n:x}")
}
