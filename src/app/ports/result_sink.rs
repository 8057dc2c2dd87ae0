use std::path::PathBuf;

use crate::orchestrator::SweepReport;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize report: {0}")]
    Serialize(String),
}

/// Hand-off point for a finished sweep.
#[cfg_attr(test, mockall::automock)]
pub trait ResultSink: Send + Sync {
    fn publish(&self, report: &SweepReport) -> Result<Vec<PathBuf>, SinkError>;
}
