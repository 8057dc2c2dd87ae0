mod async_stream;
mod cursor_pagination;
mod multiprocessing;
mod naive;
mod pooled_sync;

pub use async_stream::AsyncStreamStrategy;
pub use cursor_pagination::CursorPaginationStrategy;
pub use multiprocessing::MultiprocessingStrategy;
pub use naive::NaiveStrategy;
pub use pooled_sync::PooledSyncStrategy;

use tokio::runtime::Runtime;

use crate::domain::{ChunkFailure, StrategyError};
use crate::ports::{AsyncBatchCursor, BatchCursor, Execution};

/// Fetches `batch_size` rows at a time until the portal is exhausted.
pub(crate) fn drain(cursor: &mut dyn BatchCursor, batch_size: u32) -> Result<u64, StrategyError> {
    let mut rows = 0u64;
    loop {
        match cursor.fetch(batch_size)? {
            0 => return Ok(rows),
            fetched => rows += fetched as u64,
        }
    }
}

async fn drain_async(
    cursor: &mut dyn AsyncBatchCursor,
    batch_size: u32,
) -> Result<u64, StrategyError> {
    let mut rows = 0u64;
    loop {
        match cursor.fetch(batch_size).await? {
            0 => return Ok(rows),
            fetched => rows += fetched as u64,
        }
    }
}

/// Single-threaded event loop owned by one strategy instance.
fn current_thread_runtime(slot: &mut Option<Runtime>) -> Result<&Runtime, StrategyError> {
    let runtime = match slot.take() {
        Some(runtime) => runtime,
        None => tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                StrategyError::resource_exhaustion(format!("failed to start event loop: {}", e))
            })?,
    };
    Ok(slot.insert(runtime))
}

/// Records tolerated chunk failures on an execution, keeping the first few in the notes.
fn with_chunk_failures(mut execution: Execution, failures: Vec<ChunkFailure>) -> Execution {
    if failures.is_empty() {
        return execution;
    }
    let summary: Vec<String> = failures.iter().take(3).map(ChunkFailure::describe).collect();
    let notes = match execution.notes.take() {
        Some(notes) => format!("{}, errors={}: {}", notes, failures.len(), summary.join("; ")),
        None => format!("errors={}: {}", failures.len(), summary.join("; ")),
    };
    execution.notes = Some(notes);
    execution.chunk_failures = failures;
    execution
}
