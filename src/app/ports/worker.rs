use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ErrorDescriptor, StrategyError};

/// Chunk assignment sent to one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTask {
    pub dsn: String,
    pub ids: Vec<i64>,
    pub statement_timeout_ms: u64,
    pub batch_size: u32,
}

/// A worker's answer: the rows it read, or why it could not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReply {
    pub count: u64,
    pub error: Option<ErrorDescriptor>,
}

impl ChunkReply {
    pub fn ok(count: u64) -> Self {
        Self { count, error: None }
    }

    pub fn failed(error: &StrategyError) -> Self {
        Self {
            count: 0,
            error: Some(error.descriptor()),
        }
    }

    pub fn into_result(self) -> Result<u64, StrategyError> {
        match self.error {
            Some(descriptor) => Err(StrategyError::new(descriptor.kind, descriptor.message)),
            None => Ok(self.count),
        }
    }
}

/// Runs one chunk in an isolated worker. Dropping the returned future must
/// terminate the worker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn run_chunk(&self, task: ChunkTask) -> Result<u64, StrategyError>;
}
