//! Async reads through `tokio-postgres`, pooled with `deadpool-postgres`.

use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::{Client, Config, NoTls, Portal, Transaction};

use crate::adapters::sql::{IdParams, RecordParams, portal_rows, set_local_timeout};
use crate::app::ports::{AsyncBatchCursor, AsyncConnection, AsyncConnector, AsyncPool, RecordQuery};
use crate::classify::{classify_pg, classify_pool};
use crate::domain::{IdRange, StatementTimeout, StrategyError};

/// Builds a deadpool over `config`. Building does not connect.
pub fn pg_pool(
    config: Config,
    max_size: usize,
    recycling_method: RecyclingMethod,
) -> Result<Pool, StrategyError> {
    let manager = Manager::from_config(config, NoTls, ManagerConfig { recycling_method });
    Pool::builder(manager)
        .max_size(max_size.max(1))
        .build()
        .map_err(|e| StrategyError::connectivity(format!("failed to build pool: {}", e)))
}

/// Opens a read-only transaction with the statement timeout applied.
pub async fn begin_read(
    client: &mut Client,
    timeout: StatementTimeout,
) -> Result<Transaction<'_>, StrategyError> {
    let transaction = client
        .build_transaction()
        .read_only(true)
        .start()
        .await
        .map_err(|e| classify_pg(&e))?;
    if let Some(statement) = set_local_timeout(timeout) {
        transaction
            .batch_execute(&statement)
            .await
            .map_err(|e| classify_pg(&e))?;
    }
    Ok(transaction)
}

pub async fn bind_records(
    transaction: &Transaction<'_>,
    query: RecordQuery<'_>,
) -> Result<Portal, StrategyError> {
    let params = RecordParams::new(query);
    transaction
        .bind(params.statement(), &params.params())
        .await
        .map_err(|e| classify_pg(&e))
}

#[derive(Debug, Clone)]
pub struct PgAsyncConnector {
    config: Config,
}

impl PgAsyncConnector {
    pub fn new(dsn: &str) -> Result<Self, StrategyError> {
        let config = dsn
            .parse::<Config>()
            .map_err(|e| StrategyError::connectivity(format!("invalid connection string: {}", e)))?;
        Ok(Self { config })
    }

    pub fn from_config(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AsyncConnector for PgAsyncConnector {
    async fn connect(&self) -> Result<Box<dyn AsyncConnection>, StrategyError> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| classify_pg(&e))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "connection closed with error");
            }
        });
        Ok(Box::new(PgAsyncConnection {
            handle: Handle::Direct(client),
        }))
    }

    async fn open_pool(&self, max_size: usize) -> Result<Arc<dyn AsyncPool>, StrategyError> {
        let pool = pg_pool(self.config.clone(), max_size, RecyclingMethod::Fast)?;
        tracing::debug!(max_size, "async pool opened");
        Ok(Arc::new(PgAsyncPool { pool }))
    }
}

pub struct PgAsyncPool {
    pool: Pool,
}

#[async_trait]
impl AsyncPool for PgAsyncPool {
    async fn acquire(&self) -> Result<Box<dyn AsyncConnection>, StrategyError> {
        let object = self.pool.get().await.map_err(|e| classify_pool(&e))?;
        Ok(Box::new(PgAsyncConnection {
            handle: Handle::Pooled(object),
        }))
    }

    fn close(&self) {
        self.pool.close();
        tracing::debug!("async pool closed");
    }
}

enum Handle {
    Direct(Client),
    Pooled(Object),
}

pub struct PgAsyncConnection {
    handle: Handle,
}

impl PgAsyncConnection {
    fn client(&mut self) -> &mut Client {
        match &mut self.handle {
            Handle::Direct(client) => client,
            Handle::Pooled(object) => &mut ***object,
        }
    }
}

#[async_trait]
impl AsyncConnection for PgAsyncConnection {
    async fn open_cursor<'c>(
        &'c mut self,
        query: RecordQuery<'c>,
        timeout: StatementTimeout,
    ) -> Result<Box<dyn AsyncBatchCursor + 'c>, StrategyError> {
        let transaction = begin_read(self.client(), timeout).await?;
        let portal = bind_records(&transaction, query).await?;
        Ok(Box::new(PgPortalCursor {
            transaction,
            portal,
        }))
    }

    async fn fetch_ids(
        &mut self,
        range: IdRange,
        timeout: StatementTimeout,
    ) -> Result<Vec<i64>, StrategyError> {
        let transaction = begin_read(self.client(), timeout).await?;
        let params = IdParams::new(range);
        let rows = transaction
            .query(params.statement(), &params.params())
            .await
            .map_err(|e| classify_pg(&e))?;
        let ids = rows
            .iter()
            .map(|row| row.try_get::<_, i64>(0))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| classify_pg(&e))?;
        transaction.commit().await.map_err(|e| classify_pg(&e))?;
        Ok(ids)
    }
}

/// A bound portal inside its transaction; dropping it rolls the transaction back.
struct PgPortalCursor<'c> {
    transaction: Transaction<'c>,
    portal: Portal,
}

#[async_trait]
impl AsyncBatchCursor for PgPortalCursor<'_> {
    async fn fetch(&mut self, max_rows: u32) -> Result<usize, StrategyError> {
        let rows = self
            .transaction
            .query_portal(&self.portal, portal_rows(max_rows))
            .await
            .map_err(|e| classify_pg(&e))?;
        Ok(rows.len())
    }
}
