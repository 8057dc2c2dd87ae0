pub mod database;
pub mod probe;
pub mod result_sink;
pub mod strategy;
pub mod worker;

pub use database::{
    AsyncBatchCursor, AsyncConnection, AsyncConnector, AsyncPool, BatchCursor, PoolSize,
    RecordQuery, SyncConnection, SyncConnector, SyncPool,
};
pub use probe::{AllocationTracker, ResourceProbe, ResourceSnapshot};
pub use result_sink::{ResultSink, SinkError};
pub use strategy::{Closeable, Execution, Strategy, StrategyFactory};
pub use worker::{ChunkReply, ChunkTask, WorkerLauncher};
