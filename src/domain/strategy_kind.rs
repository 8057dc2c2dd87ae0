use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The five read strategies under measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    AsyncStream,
    CursorPagination,
    Multiprocessing,
    Naive,
    PooledSync,
}

impl StrategyKind {
    /// Sorted by name; this is the order an "all" sweep runs them in.
    pub fn available() -> &'static [StrategyKind] {
        &[
            StrategyKind::AsyncStream,
            StrategyKind::CursorPagination,
            StrategyKind::Multiprocessing,
            StrategyKind::Naive,
            StrategyKind::PooledSync,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::AsyncStream => "async_stream",
            StrategyKind::CursorPagination => "cursor_pagination",
            StrategyKind::Multiprocessing => "multiprocessing",
            StrategyKind::Naive => "naive",
            StrategyKind::PooledSync => "pooled_sync",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StrategyKind::AsyncStream => "Async portal streaming, optionally fanned out over a pool",
            StrategyKind::CursorPagination => "Server-side cursor with fixed-size batch fetches",
            StrategyKind::Multiprocessing => "ID chunks fanned out to spawned worker processes",
            StrategyKind::Naive => "Single bounded SELECT materialized client-side",
            StrategyKind::PooledSync => "Pooled blocking connection with batch fetches",
        }
    }

    /// Whether memory and CPU of child processes belong to this strategy's measurement.
    pub fn spawns_workers(&self) -> bool {
        matches!(self, StrategyKind::Multiprocessing)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::available()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| {
                let names: Vec<&str> = StrategyKind::available()
                    .iter()
                    .map(StrategyKind::as_str)
                    .collect();
                format!("Unknown strategy '{}'. Available: {}", s, names.join(", "))
            })
    }
}
