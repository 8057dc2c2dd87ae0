use std::sync::Arc;

use crate::domain::{StatementTimeout, StrategyError, StrategyKind};
use crate::ports::{
    Closeable, Execution, PoolSize, RecordQuery, Strategy, SyncConnector, SyncPool,
};
use crate::registry::StrategyContext;

use super::drain;

/// Batch fetches over a connection checked out of a bounded pool.
///
/// The pool is opened on the first `execute` and lives until `close`.
pub struct PooledSyncStrategy {
    connector: Arc<dyn SyncConnector>,
    pool: Option<Box<dyn SyncPool>>,
    size: PoolSize,
    batch_size: u32,
    timeout: StatementTimeout,
}

impl PooledSyncStrategy {
    pub fn new(context: StrategyContext) -> Self {
        Self {
            connector: context.sync_connector,
            pool: None,
            size: context.tuning.pool_size,
            batch_size: context.tuning.batch_size,
            timeout: context.statement_timeout,
        }
    }

    fn pool(&mut self) -> Result<&dyn SyncPool, StrategyError> {
        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => {
                tracing::debug!(min = self.size.min, max = self.size.max, "opening connection pool");
                self.connector.open_pool(self.size)?
            }
        };
        Ok(&**self.pool.insert(pool))
    }
}

impl Strategy for PooledSyncStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PooledSync
    }

    fn execute(&mut self, limit: u64) -> Result<Execution, StrategyError> {
        let (batch_size, timeout, size) = (self.batch_size, self.timeout, self.size);
        let pool = self.pool()?;

        // Checkout returns to the pool when dropped, on success or error.
        let mut connection = pool.checkout()?;
        let mut cursor = connection.open_cursor(RecordQuery::Prefix { limit }, timeout)?;
        let rows = drain(cursor.as_mut(), batch_size)?;

        Ok(Execution::rows(rows)
            .with_notes(format!(
                "pooled_sync batch_size={} pool=({},{})",
                batch_size, size.min, size.max
            ))
            .with_extra("pool_min", size.min)
            .with_extra("pool_max", size.max))
    }

    fn closer(&mut self) -> Option<&mut dyn Closeable> {
        Some(self)
    }
}

impl Closeable for PooledSyncStrategy {
    fn close(&mut self) -> Result<(), StrategyError> {
        if let Some(mut pool) = self.pool.take() {
            pool.close();
            tracing::debug!("connection pool closed");
        }
        Ok(())
    }
}
