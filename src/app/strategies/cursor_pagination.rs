use std::sync::Arc;

use crate::domain::{StatementTimeout, StrategyError, StrategyKind};
use crate::ports::{Execution, RecordQuery, Strategy, SyncConnector};
use crate::registry::StrategyContext;

use super::drain;

/// One transaction, one server-side portal, fixed-size batch fetches.
pub struct CursorPaginationStrategy {
    connector: Arc<dyn SyncConnector>,
    batch_size: u32,
    timeout: StatementTimeout,
}

impl CursorPaginationStrategy {
    pub fn new(context: StrategyContext) -> Self {
        Self {
            connector: context.sync_connector,
            batch_size: context.tuning.batch_size,
            timeout: context.statement_timeout,
        }
    }
}

impl Strategy for CursorPaginationStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CursorPagination
    }

    fn execute(&mut self, limit: u64) -> Result<Execution, StrategyError> {
        let mut connection = self.connector.connect()?;
        let mut cursor = connection.open_cursor(RecordQuery::Prefix { limit }, self.timeout)?;
        let rows = drain(cursor.as_mut(), self.batch_size)?;

        Ok(Execution::rows(rows)
            .with_notes(format!("Cursor pagination batch_size={}.", self.batch_size))
            .with_extra("batch_size", self.batch_size))
    }
}
