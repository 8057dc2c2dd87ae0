use std::sync::Arc;

use crate::domain::{StatementTimeout, StrategyError, StrategyKind};
use crate::ports::{Execution, Strategy, SyncConnector};
use crate::registry::StrategyContext;

/// Baseline: one bounded SELECT, every row materialized before counting.
pub struct NaiveStrategy {
    connector: Arc<dyn SyncConnector>,
    timeout: StatementTimeout,
}

impl NaiveStrategy {
    pub fn new(context: StrategyContext) -> Self {
        Self {
            connector: context.sync_connector,
            timeout: context.statement_timeout,
        }
    }
}

impl Strategy for NaiveStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Naive
    }

    fn execute(&mut self, limit: u64) -> Result<Execution, StrategyError> {
        let mut connection = self.connector.connect()?;
        let rows = connection.fetch_all(limit, self.timeout)?;

        Ok(Execution::rows(rows).with_notes("Fetch-all baseline; no pagination or pooling."))
    }
}
