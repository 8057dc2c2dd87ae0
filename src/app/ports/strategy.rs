use std::collections::BTreeMap;

use crate::domain::{ChunkFailure, StrategyError, StrategyKind};

/// What one successful `execute` produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    pub rows: u64,
    pub notes: Option<String>,
    pub extra: BTreeMap<String, String>,
    /// Chunks that failed while the rest of a tolerant fan-out completed
    pub chunk_failures: Vec<ChunkFailure>,
}

impl Execution {
    pub fn rows(rows: u64) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extra.insert(key.into(), value.to_string());
        self
    }
}

/// A read strategy under measurement.
///
/// One instance serves one warmup or measured run; the caller closes it
/// through [`Strategy::closer`] exactly once afterwards.
pub trait Strategy: Send {
    fn kind(&self) -> StrategyKind;

    fn execute(&mut self, limit: u64) -> Result<Execution, StrategyError>;

    /// Resource-owning strategies hand out their close capability here.
    fn closer(&mut self) -> Option<&mut dyn Closeable> {
        None
    }
}

pub trait Closeable {
    fn close(&mut self) -> Result<(), StrategyError>;
}

/// Builds a fresh strategy instance for every run.
#[cfg_attr(test, mockall::automock)]
pub trait StrategyFactory: Send + Sync {
    fn create(&self, kind: StrategyKind) -> Result<Box<dyn Strategy>, StrategyError>;
}
