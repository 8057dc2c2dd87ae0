use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{IdRange, StatementTimeout, StrategyError};

/// The row sets a strategy reads from `public.records`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordQuery<'a> {
    /// `ORDER BY id LIMIT n`
    Prefix { limit: u64 },
    /// `WHERE id = ANY(keys) ORDER BY id`
    Keys(&'a [i64]),
}

/// A server-side portal inside an open transaction.
pub trait BatchCursor {
    /// Fetches up to `max_rows` rows and returns how many arrived; zero means exhausted.
    fn fetch(&mut self, max_rows: u32) -> Result<usize, StrategyError>;
}

pub trait SyncConnection: Send {
    /// Runs the query and materializes every row client-side before counting.
    fn fetch_all(&mut self, limit: u64, timeout: StatementTimeout) -> Result<u64, StrategyError>;

    /// Opens a transaction with the statement timeout applied and binds a portal.
    fn open_cursor<'c>(
        &'c mut self,
        query: RecordQuery<'c>,
        timeout: StatementTimeout,
    ) -> Result<Box<dyn BatchCursor + 'c>, StrategyError>;
}

/// A bounded set of blocking connections. Checkouts return to the pool on drop.
pub trait SyncPool: Send {
    fn checkout(&self) -> Result<Box<dyn SyncConnection + '_>, StrategyError>;

    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSize {
    pub min: usize,
    pub max: usize,
}

impl Default for PoolSize {
    fn default() -> Self {
        Self { min: 1, max: 10 }
    }
}

pub trait SyncConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn SyncConnection>, StrategyError>;

    fn open_pool(&self, size: PoolSize) -> Result<Box<dyn SyncPool>, StrategyError>;
}

#[async_trait]
pub trait AsyncBatchCursor: Send {
    async fn fetch(&mut self, max_rows: u32) -> Result<usize, StrategyError>;
}

#[async_trait]
pub trait AsyncConnection: Send {
    async fn open_cursor<'c>(
        &'c mut self,
        query: RecordQuery<'c>,
        timeout: StatementTimeout,
    ) -> Result<Box<dyn AsyncBatchCursor + 'c>, StrategyError>;

    /// Phase-1 key snapshot for one range, in ascending id order.
    async fn fetch_ids(
        &mut self,
        range: IdRange,
        timeout: StatementTimeout,
    ) -> Result<Vec<i64>, StrategyError>;
}

#[async_trait]
pub trait AsyncPool: Send + Sync {
    async fn acquire(&self) -> Result<Box<dyn AsyncConnection>, StrategyError>;

    fn close(&self);
}

#[async_trait]
pub trait AsyncConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn AsyncConnection>, StrategyError>;

    async fn open_pool(&self, max_size: usize) -> Result<Arc<dyn AsyncPool>, StrategyError>;
}
