//! The body of one worker process: read a chunk of keys and report the count.

use crate::domain::{StatementTimeout, StrategyError};
use crate::ports::{ChunkReply, ChunkTask, RecordQuery, SyncConnector};
use crate::strategies::drain;

/// Opens its own connection, streams the chunk's rows in batches and
/// replies with the count. Failures are returned inside the reply.
pub fn serve_chunk(connector: &dyn SyncConnector, task: &ChunkTask) -> ChunkReply {
    if task.ids.is_empty() {
        return ChunkReply::ok(0);
    }

    match read_chunk(connector, task) {
        Ok(count) => {
            tracing::debug!(ids = task.ids.len(), rows = count, "chunk read");
            ChunkReply::ok(count)
        }
        Err(e) => {
            tracing::warn!(
                ids = task.ids.len(),
                first = task.ids.first().copied(),
                last = task.ids.last().copied(),
                error = %e,
                "chunk failed"
            );
            ChunkReply::failed(&e)
        }
    }
}

fn read_chunk(connector: &dyn SyncConnector, task: &ChunkTask) -> Result<u64, StrategyError> {
    let timeout = StatementTimeout::from_millis(task.statement_timeout_ms);
    let mut connection = connector.connect()?;
    let mut cursor = connection.open_cursor(RecordQuery::Keys(&task.ids), timeout)?;
    drain(cursor.as_mut(), task.batch_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::testing::{FakeSyncConnector, RecordTable};

    fn task(ids: Vec<i64>) -> ChunkTask {
        ChunkTask {
            dsn: "postgresql://localhost/bench".to_string(),
            ids,
            statement_timeout_ms: 0,
            batch_size: 7,
        }
    }

    #[test]
    fn counts_only_existing_keys() {
        let connector = FakeSyncConnector::new(RecordTable::from_ids((1..=10).chain(20..=30)));

        let reply = serve_chunk(&connector, &task((5..=25).collect()));

        assert_eq!(reply, ChunkReply::ok(12));
    }

    #[test]
    fn zero_batch_size_still_drains_the_chunk() {
        let connector = FakeSyncConnector::new(RecordTable::contiguous(10));
        let mut task = task((1..=10).collect());
        task.batch_size = 0;

        let reply = serve_chunk(&connector, &task);

        assert_eq!(reply, ChunkReply::ok(10));
    }

    #[test]
    fn empty_chunk_skips_connecting() {
        let table = RecordTable::contiguous(3);
        let connector = FakeSyncConnector::new(table.clone());

        let reply = serve_chunk(&connector, &task(Vec::new()));

        assert_eq!(reply, ChunkReply::ok(0));
        assert_eq!(table.stats().connects, 0);
    }

    #[test]
    fn failure_travels_in_reply() {
        let table = RecordTable::contiguous(10);
        table.fail_connect(StrategyError::connectivity("could not connect to server"));
        let connector = FakeSyncConnector::new(table);

        let reply = serve_chunk(&connector, &task(vec![1, 2, 3]));

        assert_eq!(reply.count, 0);
        let err = reply.into_result().unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConnectivityFailure);
        assert_eq!(err.message, "could not connect to server");
    }
}
