use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    FailurePolicy, IdWindowing, RunConfig, StatementTimeout, StrategyError, StrategyKind,
};
use crate::ports::{
    AsyncConnector, PoolSize, Strategy, StrategyFactory, SyncConnector, WorkerLauncher,
};
use crate::strategies::{
    AsyncStreamStrategy, CursorPaginationStrategy, MultiprocessingStrategy, NaiveStrategy,
    PooledSyncStrategy,
};

pub const DEFAULT_BATCH_SIZE: u32 = 10_000;
pub const DEFAULT_CHUNK_SIZE: usize = 50_000;
pub const DEFAULT_FAN_OUT_TIMEOUT: Duration = Duration::from_secs(600);

/// Strategy-specific knobs with their production defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub batch_size: u32,
    pub pool_size: PoolSize,
    /// Keys per worker process
    pub chunk_size: usize,
    /// Worker processes in flight; `None` uses CPU count - 1
    pub processes: Option<usize>,
    pub windowing: IdWindowing,
    pub fan_out_timeout: Duration,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pool_size: PoolSize::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            processes: None,
            windowing: IdWindowing::default(),
            fan_out_timeout: DEFAULT_FAN_OUT_TIMEOUT,
        }
    }
}

/// Everything a strategy instance may use, handed over by value at construction.
#[derive(Clone)]
pub struct StrategyContext {
    /// Passed to worker processes so they open their own connections
    pub dsn: String,
    pub concurrency: Option<u32>,
    pub statement_timeout: StatementTimeout,
    pub failure_policy: FailurePolicy,
    pub tuning: Tuning,
    pub sync_connector: Arc<dyn SyncConnector>,
    pub async_connector: Arc<dyn AsyncConnector>,
    pub workers: Arc<dyn WorkerLauncher>,
}

impl StrategyContext {
    pub fn new(
        dsn: impl Into<String>,
        sync_connector: Arc<dyn SyncConnector>,
        async_connector: Arc<dyn AsyncConnector>,
        workers: Arc<dyn WorkerLauncher>,
    ) -> Self {
        Self {
            dsn: dsn.into(),
            concurrency: None,
            statement_timeout: StatementTimeout::disabled(),
            failure_policy: FailurePolicy::default(),
            tuning: Tuning::default(),
            sync_connector,
            async_connector,
            workers,
        }
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Applies the invocation-wide settings of `config`.
    pub fn configured_by(mut self, config: &RunConfig) -> Self {
        self.concurrency = config.concurrency();
        self.statement_timeout = config.statement_timeout();
        self.failure_policy = config.failure_policy();
        self
    }

    pub fn worker_processes(&self) -> usize {
        self.concurrency
            .map(|n| n as usize)
            .or(self.tuning.processes)
            .unwrap_or_else(default_processes)
            .max(1)
    }
}

fn default_processes() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Builds the production strategies from one shared context.
pub struct DefaultStrategyFactory {
    context: StrategyContext,
}

impl DefaultStrategyFactory {
    pub fn new(context: StrategyContext) -> Self {
        Self { context }
    }
}

impl StrategyFactory for DefaultStrategyFactory {
    fn create(&self, kind: StrategyKind) -> Result<Box<dyn Strategy>, StrategyError> {
        let context = self.context.clone();
        Ok(match kind {
            StrategyKind::AsyncStream => Box::new(AsyncStreamStrategy::new(context)),
            StrategyKind::CursorPagination => Box::new(CursorPaginationStrategy::new(context)),
            StrategyKind::Multiprocessing => Box::new(MultiprocessingStrategy::new(context)),
            StrategyKind::Naive => Box::new(NaiveStrategy::new(context)),
            StrategyKind::PooledSync => Box::new(PooledSyncStrategy::new(context)),
        })
    }
}
