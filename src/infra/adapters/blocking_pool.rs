//! A bounded connection pool usable from blocking code.
//!
//! Connections come from a `deadpool-postgres` pool driven by a private
//! current-thread runtime; every call blocks on that runtime, so no runtime
//! may be active on the calling thread.

use deadpool_postgres::{Object, Pool, RecyclingMethod};
use tokio::runtime::{Builder, Runtime};
use tokio_postgres::{Portal, Transaction};

use crate::adapters::postgres_async::{begin_read, bind_records, pg_pool};
use crate::adapters::sql::{SELECT_PREFIX, limit_param, portal_rows};
use crate::app::ports::{BatchCursor, PoolSize, RecordQuery, SyncConnection, SyncPool};
use crate::classify::{classify_pg, classify_pool};
use crate::domain::{StatementTimeout, StrategyError};

pub struct BlockingPgPool {
    runtime: Runtime,
    pool: Pool,
}

impl BlockingPgPool {
    /// Builds the pool and opens `size.min` connections up front.
    pub fn open(config: tokio_postgres::Config, size: PoolSize) -> Result<Self, StrategyError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StrategyError::resource_exhaustion(format!("runtime: {}", e)))?;
        let pool = pg_pool(config, size.max, RecyclingMethod::Verified)?;

        let min = size.min.min(size.max);
        runtime.block_on(async {
            let mut warm = Vec::with_capacity(min);
            for _ in 0..min {
                warm.push(pool.get().await.map_err(|e| classify_pool(&e))?);
            }
            Ok::<_, StrategyError>(())
        })?;
        tracing::debug!(min, max = size.max, "blocking pool opened");

        Ok(Self { runtime, pool })
    }
}

impl SyncPool for BlockingPgPool {
    fn checkout(&self) -> Result<Box<dyn SyncConnection + '_>, StrategyError> {
        let object = self
            .runtime
            .block_on(self.pool.get())
            .map_err(|e| classify_pool(&e))?;
        Ok(Box::new(PooledConnection {
            runtime: &self.runtime,
            object,
        }))
    }

    fn close(&mut self) {
        if !self.pool.is_closed() {
            self.pool.close();
            tracing::debug!("blocking pool closed");
        }
    }
}

/// Returned to the pool when dropped.
struct PooledConnection<'p> {
    runtime: &'p Runtime,
    object: Object,
}

impl PooledConnection<'_> {
    fn client(&mut self) -> &mut tokio_postgres::Client {
        &mut self.object
    }
}

impl SyncConnection for PooledConnection<'_> {
    fn fetch_all(&mut self, limit: u64, timeout: StatementTimeout) -> Result<u64, StrategyError> {
        let runtime = self.runtime;
        let client = self.client();
        runtime.block_on(async {
            let transaction = begin_read(client, timeout).await?;
            let rows = transaction
                .query(SELECT_PREFIX, &[&limit_param(limit)])
                .await
                .map_err(|e| classify_pg(&e))?;
            transaction.commit().await.map_err(|e| classify_pg(&e))?;
            Ok(rows.len() as u64)
        })
    }

    fn open_cursor<'c>(
        &'c mut self,
        query: RecordQuery<'c>,
        timeout: StatementTimeout,
    ) -> Result<Box<dyn BatchCursor + 'c>, StrategyError> {
        let runtime = self.runtime;
        let client = self.client();
        let (transaction, portal) = runtime.block_on(async {
            let transaction = begin_read(client, timeout).await?;
            let portal = bind_records(&transaction, query).await?;
            Ok::<_, StrategyError>((transaction, portal))
        })?;
        Ok(Box::new(BlockingPortalCursor {
            runtime,
            transaction,
            portal,
        }))
    }
}

struct BlockingPortalCursor<'c> {
    runtime: &'c Runtime,
    transaction: Transaction<'c>,
    portal: Portal,
}

impl BatchCursor for BlockingPortalCursor<'_> {
    fn fetch(&mut self, max_rows: u32) -> Result<usize, StrategyError> {
        let rows = self
            .runtime
            .block_on(self.transaction.query_portal(&self.portal, portal_rows(max_rows)))
            .map_err(|e| classify_pg(&e))?;
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;

    fn unreachable() -> tokio_postgres::Config {
        "postgresql://bench@127.0.0.1:1/bench?connect_timeout=1"
            .parse()
            .unwrap()
    }

    #[test]
    fn warm_up_failure_surfaces_as_connectivity() {
        let err = BlockingPgPool::open(unreachable(), PoolSize { min: 1, max: 2 })
            .err()
            .unwrap();

        assert_eq!(err.kind, ErrorKind::ConnectivityFailure);
    }

    #[test]
    fn zero_min_opens_lazily_and_closes_twice() {
        let mut pool = BlockingPgPool::open(unreachable(), PoolSize { min: 0, max: 2 }).unwrap();

        pool.close();
        pool.close();

        assert!(pool.pool.is_closed());
    }
}
