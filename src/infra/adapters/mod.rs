pub mod blocking_pool;
pub mod json_sink;
pub mod postgres_async;
pub mod postgres_sync;
pub mod process_worker;
pub mod sql;

pub use blocking_pool::BlockingPgPool;
pub use json_sink::JsonResultSink;
pub use postgres_async::PgAsyncConnector;
pub use postgres_sync::PgSyncConnector;
pub use process_worker::{ProcessWorkerLauncher, WORKER_SUBCOMMAND, serve_stdio};
