//! Blocking reads through the `postgres` crate.

use postgres::{Client, Config, NoTls, Portal, Transaction};

use crate::adapters::blocking_pool::BlockingPgPool;
use crate::adapters::sql::{RecordParams, SELECT_PREFIX, limit_param, portal_rows, set_local_timeout};
use crate::app::ports::{BatchCursor, PoolSize, RecordQuery, SyncConnection, SyncConnector, SyncPool};
use crate::classify::classify_pg;
use crate::domain::{StatementTimeout, StrategyError};

/// Opens dedicated connections, and blocking pools over the async driver.
#[derive(Debug, Clone)]
pub struct PgSyncConnector {
    config: Config,
    pool_config: tokio_postgres::Config,
}

impl PgSyncConnector {
    pub fn new(dsn: &str) -> Result<Self, StrategyError> {
        let pool_config = dsn
            .parse::<tokio_postgres::Config>()
            .map_err(|e| StrategyError::connectivity(format!("invalid connection string: {}", e)))?;
        Ok(Self {
            config: Config::from(pool_config.clone()),
            pool_config,
        })
    }
}

impl SyncConnector for PgSyncConnector {
    fn connect(&self) -> Result<Box<dyn SyncConnection>, StrategyError> {
        let client = self.config.connect(NoTls).map_err(|e| classify_pg(&e))?;
        Ok(Box::new(PgSyncConnection { client }))
    }

    fn open_pool(&self, size: PoolSize) -> Result<Box<dyn SyncPool>, StrategyError> {
        let pool = BlockingPgPool::open(self.pool_config.clone(), size)?;
        Ok(Box::new(pool))
    }
}

pub struct PgSyncConnection {
    client: Client,
}

fn begin(client: &mut Client, timeout: StatementTimeout) -> Result<Transaction<'_>, StrategyError> {
    let mut transaction = client
        .build_transaction()
        .read_only(true)
        .start()
        .map_err(|e| classify_pg(&e))?;
    if let Some(statement) = set_local_timeout(timeout) {
        transaction
            .batch_execute(&statement)
            .map_err(|e| classify_pg(&e))?;
    }
    Ok(transaction)
}

impl SyncConnection for PgSyncConnection {
    fn fetch_all(&mut self, limit: u64, timeout: StatementTimeout) -> Result<u64, StrategyError> {
        let mut transaction = begin(&mut self.client, timeout)?;
        let rows = transaction
            .query(SELECT_PREFIX, &[&limit_param(limit)])
            .map_err(|e| classify_pg(&e))?;
        transaction.commit().map_err(|e| classify_pg(&e))?;
        Ok(rows.len() as u64)
    }

    fn open_cursor<'c>(
        &'c mut self,
        query: RecordQuery<'c>,
        timeout: StatementTimeout,
    ) -> Result<Box<dyn BatchCursor + 'c>, StrategyError> {
        let mut transaction = begin(&mut self.client, timeout)?;
        let params = RecordParams::new(query);
        let portal = transaction
            .bind(params.statement(), &params.params())
            .map_err(|e| classify_pg(&e))?;
        Ok(Box::new(PgPortalCursor {
            transaction,
            portal,
        }))
    }
}

struct PgPortalCursor<'c> {
    transaction: Transaction<'c>,
    portal: Portal,
}

impl BatchCursor for PgPortalCursor<'_> {
    fn fetch(&mut self, max_rows: u32) -> Result<usize, StrategyError> {
        let rows = self
            .transaction
            .query_portal(&self.portal, portal_rows(max_rows))
            .map_err(|e| classify_pg(&e))?;
        Ok(rows.len())
    }
}
