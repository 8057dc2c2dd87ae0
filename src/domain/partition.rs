//! Pure key-partitioning rules shared by the fan-out strategies.
//!
//! Partition keys are whatever `ORDER BY id` returned; nothing here assumes
//! they are contiguous or start at 1.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use super::error::{ErrorDescriptor, StrategyError};

pub const DEFAULT_WINDOW_THRESHOLD: u64 = 50_000;
pub const DEFAULT_WINDOW_SIZE: u64 = 20_000;

/// One Phase-1 key request: up to `limit` ids strictly greater than `after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub after: Option<i64>,
    pub limit: u64,
}

impl IdRange {
    pub fn first(limit: u64) -> Self {
        Self { after: None, limit }
    }

    pub fn after(last_id: i64, limit: u64) -> Self {
        Self {
            after: Some(last_id),
            limit,
        }
    }
}

/// Bounded-ID guardrail: limits above `threshold` fetch keys `window` at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdWindowing {
    pub threshold: u64,
    pub window: u64,
}

impl IdWindowing {
    pub fn applies_to(&self, limit: u64) -> bool {
        limit > self.threshold
    }
}

impl Default for IdWindowing {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_WINDOW_THRESHOLD,
            window: DEFAULT_WINDOW_SIZE,
        }
    }
}

/// How a snapshot of keys is cut into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunking {
    /// Consecutive chunks of at most `n` keys
    FixedSize(usize),
    /// Exactly `min(n, len)` chunks whose sizes differ by at most one
    EvenSplit(usize),
}

impl Chunking {
    pub fn split<'a>(&self, ids: &'a [i64]) -> Vec<&'a [i64]> {
        match *self {
            Chunking::FixedSize(size) => ids.chunks(size.max(1)).collect(),
            Chunking::EvenSplit(parts) => split_even(ids.len(), parts)
                .into_iter()
                .map(|range| &ids[range])
                .collect(),
        }
    }
}

/// Splits `len` positions into `min(parts, len)` contiguous index ranges,
/// handing the remainder to the leading ranges.
pub fn split_even(len: usize, parts: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }

    let parts = parts.clamp(1, len);
    let base = len / parts;
    let remainder = len % parts;

    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for index in 0..parts {
        let size = base + usize::from(index < remainder);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

/// A chunk that failed during fan-out, identified by its key span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkFailure {
    pub first_id: Option<i64>,
    pub last_id: Option<i64>,
    pub len: usize,
    pub error: ErrorDescriptor,
}

impl ChunkFailure {
    pub fn new(chunk: &[i64], error: ErrorDescriptor) -> Self {
        Self {
            first_id: chunk.first().copied(),
            last_id: chunk.last().copied(),
            len: chunk.len(),
            error,
        }
    }

    /// Key span and error message, e.g. `ids[3] 1000..1400: statement timeout`.
    pub fn describe(&self) -> String {
        match (self.first_id, self.last_id) {
            (Some(first), Some(last)) => {
                format!("ids[{}] {}..{}: {}", self.len, first, last, self.error.message)
            }
            _ => format!("ids[0]: {}", self.error.message),
        }
    }

    pub fn to_error(&self) -> StrategyError {
        StrategyError::new(self.error.kind, self.describe())
    }
}
