//! Scan watermark and block range selection.

use std::fmt;

/// Inclusive block range to query. `from == to` means nothing new to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }
}

impl fmt::Display for BlockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.from, self.to)
    }
}

/// Owns `last_scanned_block`. The watermark never decreases.
#[derive(Debug, Clone)]
pub struct BlockRangeTracker {
    last_scanned_block: u64,
}

impl BlockRangeTracker {
    pub fn new(last_scanned_block: u64) -> Self {
        Self { last_scanned_block }
    }

    /// Fresh start: begin `lookback` blocks behind the current head.
    pub fn seeded(current_height: u64, lookback: u64) -> Self {
        Self::new(current_height.saturating_sub(lookback))
    }

    pub fn last_scanned_block(&self) -> u64 {
        self.last_scanned_block
    }

    /// Range from the watermark to `current_height`. A node behind the
    /// watermark yields an empty range instead of scanning backward.
    pub fn next_range(&self, current_height: u64) -> BlockRange {
        BlockRange {
            from: self.last_scanned_block,
            to: current_height.max(self.last_scanned_block),
        }
    }

    /// Returns true when the watermark moved.
    pub fn advance(&mut self, to: u64) -> bool {
        if to > self.last_scanned_block {
            self.last_scanned_block = to;
            true
        } else {
            false
        }
    }
}
