use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::domain::{
    Chunking, FailurePolicy, IdWindowing, StatementTimeout, StrategyError, StrategyKind,
};
use crate::partition::{ConnectionIds, PartitionPlan, PartitionReport, run_partitioned};
use crate::ports::{AsyncConnector, AsyncPool, Execution, RecordQuery, Strategy};
use crate::registry::StrategyContext;

use super::{current_thread_runtime, drain_async, with_chunk_failures};

/// Cooperative streaming on a single-threaded event loop.
///
/// With concurrency 1 it streams one portal sequentially. Wider concurrency
/// runs the two-phase key protocol over a pool of `2 × concurrency`
/// connections, splitting each key window evenly across `concurrency` chunks.
pub struct AsyncStreamStrategy {
    connector: Arc<dyn AsyncConnector>,
    concurrency: u32,
    batch_size: u32,
    timeout: StatementTimeout,
    policy: FailurePolicy,
    windowing: IdWindowing,
    runtime: Option<Runtime>,
}

impl AsyncStreamStrategy {
    pub fn new(context: StrategyContext) -> Self {
        Self {
            connector: context.async_connector,
            concurrency: context.concurrency.unwrap_or(1).max(1),
            batch_size: context.tuning.batch_size,
            timeout: context.statement_timeout,
            policy: context.failure_policy,
            windowing: context.tuning.windowing,
            runtime: None,
        }
    }
}

impl Strategy for AsyncStreamStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AsyncStream
    }

    fn execute(&mut self, limit: u64) -> Result<Execution, StrategyError> {
        let effective = u64::from(self.concurrency).min(limit).max(1) as usize;
        let runtime = current_thread_runtime(&mut self.runtime)?;
        let connector = self.connector.as_ref();
        let (batch_size, timeout) = (self.batch_size, self.timeout);

        let notes = format!(
            "async batch_size={} concurrency={}",
            batch_size, self.concurrency
        );

        if effective <= 1 {
            let rows =
                runtime.block_on(stream_single(connector, limit, batch_size, timeout))?;
            return Ok(Execution::rows(rows)
                .with_notes(notes)
                .with_extra("mode", "single"));
        }

        let plan = PartitionPlan {
            chunking: Chunking::EvenSplit(effective),
            windowing: Some(self.windowing),
            max_in_flight: effective,
            policy: self.policy,
        };
        let report = runtime.block_on(stream_concurrent(
            connector, limit, effective, &plan, batch_size, timeout,
        ))?;

        let execution = Execution::rows(report.rows)
            .with_notes(notes)
            .with_extra("mode", "concurrent")
            .with_extra("pool_max", effective * 2)
            .with_extra("ids_selected", report.ids_selected)
            .with_extra("id_windows", report.windows)
            .with_extra("peak_ids_held", report.peak_ids_held);
        Ok(with_chunk_failures(execution, report.failures))
    }
}

async fn stream_single(
    connector: &dyn AsyncConnector,
    limit: u64,
    batch_size: u32,
    timeout: StatementTimeout,
) -> Result<u64, StrategyError> {
    let mut connection = connector.connect().await?;
    let mut cursor = connection
        .open_cursor(RecordQuery::Prefix { limit }, timeout)
        .await?;
    let rows = drain_async(cursor.as_mut(), batch_size).await?;
    Ok(rows)
}

async fn stream_concurrent(
    connector: &dyn AsyncConnector,
    limit: u64,
    effective: usize,
    plan: &PartitionPlan,
    batch_size: u32,
    timeout: StatementTimeout,
) -> Result<PartitionReport, StrategyError> {
    let pool = connector.open_pool(effective * 2).await?;

    let result = async {
        let mut coordinator = pool.acquire().await?;
        let mut source = ConnectionIds::new(coordinator.as_mut(), timeout);
        let pool = pool.as_ref();
        run_partitioned(limit, &mut source, plan, move |ids| {
            read_chunk(pool, ids, batch_size, timeout)
        })
        .await
    }
    .await;

    pool.close();
    result
}

async fn read_chunk(
    pool: &dyn AsyncPool,
    ids: Vec<i64>,
    batch_size: u32,
    timeout: StatementTimeout,
) -> Result<u64, StrategyError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let mut connection = pool.acquire().await?;
    let mut cursor = connection
        .open_cursor(RecordQuery::Keys(&ids), timeout)
        .await?;
    let rows = drain_async(cursor.as_mut(), batch_size).await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::testing::{FakeAsyncConnector, FakeSyncConnector, FakeWorkers, RecordTable};
    use rstest::rstest;

    fn strategy(table: &RecordTable, concurrency: Option<u32>, policy: FailurePolicy) -> AsyncStreamStrategy {
        let mut context = StrategyContext::new(
            "postgresql://localhost/bench",
            Arc::new(FakeSyncConnector::new(table.clone())),
            Arc::new(FakeAsyncConnector::new(table.clone())),
            Arc::new(FakeWorkers::new(table.clone())),
        );
        context.concurrency = concurrency;
        context.failure_policy = policy;
        AsyncStreamStrategy::new(context)
    }

    mod single {
        use super::*;

        #[test]
        fn streams_one_portal_sequentially() {
            let table = RecordTable::contiguous(25_000);

            let execution = strategy(&table, None, FailurePolicy::Strict)
                .execute(21_000)
                .unwrap();

            assert_eq!(execution.rows, 21_000);
            assert_eq!(execution.extra["mode"], "single");
            let stats = table.stats();
            assert_eq!(stats.cursors, 1);
            assert_eq!(stats.pools_opened, 0);
            assert!(stats.id_requests.is_empty());
        }

        #[test]
        fn limit_below_concurrency_collapses_to_single() {
            let table = RecordTable::contiguous(10);

            let execution = strategy(&table, Some(4), FailurePolicy::Strict)
                .execute(1)
                .unwrap();

            assert_eq!(execution.rows, 1);
            assert_eq!(execution.extra["mode"], "single");
        }
    }

    mod concurrent {
        use super::*;

        #[rstest]
        #[case(3, 2)]
        #[case(10, 3)]
        #[case(1_000, 4)]
        fn returns_min_of_limit_and_table(#[case] limit: u64, #[case] concurrency: u32) {
            let table = RecordTable::from_ids((1..=500).chain(1_000..=1_500));

            let execution = strategy(&table, Some(concurrency), FailurePolicy::Strict)
                .execute(limit)
                .unwrap();

            assert_eq!(execution.rows, limit.min(1_001));
        }

        #[test]
        fn pool_is_twice_effective_concurrency_and_closed() {
            let table = RecordTable::contiguous(100);

            strategy(&table, Some(3), FailurePolicy::Strict)
                .execute(100)
                .unwrap();

            let stats = table.stats();
            assert_eq!(stats.pool_sizes, vec![6]);
            assert_eq!(stats.pools_closed, 1);
        }

        #[test]
        fn guardrail_windows_large_limits() {
            let table = RecordTable::contiguous(130_000);

            let execution = strategy(&table, Some(4), FailurePolicy::Strict)
                .execute(120_000)
                .unwrap();

            assert_eq!(execution.rows, 120_000);
            assert_eq!(execution.extra["id_windows"], "6");
            assert_eq!(execution.extra["peak_ids_held"], "20000");
            let requests = table.stats().id_requests;
            assert!(requests.iter().all(|range| range.limit <= 20_000));
        }

        #[test]
        fn small_limit_issues_one_unwindowed_fetch() {
            let table = RecordTable::contiguous(60_000);

            strategy(&table, Some(4), FailurePolicy::Strict)
                .execute(10_000)
                .unwrap();

            let requests = table.stats().id_requests;
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].after, None);
            assert_eq!(requests[0].limit, 10_000);
        }

        #[test]
        fn pool_closed_after_strict_failure() {
            let table = RecordTable::contiguous(100);
            table.fail_keys_containing(60, StrategyError::resource_exhaustion("out of memory"));

            let err = strategy(&table, Some(2), FailurePolicy::Strict)
                .execute(100)
                .unwrap_err();

            assert_eq!(err.kind, ErrorKind::ResourceExhaustion);
            assert_eq!(table.stats().pools_closed, 1);
        }

        #[rstest]
        #[case(FailurePolicy::Strict)]
        #[case(FailurePolicy::Tolerant)]
        fn chunk_failure_releases_every_connection(#[case] policy: FailurePolicy) {
            let table = RecordTable::contiguous(400);
            table.fail_keys_containing(150, StrategyError::connectivity("connection reset by peer"));

            let _ = strategy(&table, Some(4), policy).execute(400);

            let stats = table.stats();
            assert!(stats.checkouts > 1);
            assert_eq!(stats.outstanding, 0);
            assert_eq!(stats.pools_closed, 1);
        }

        #[test]
        fn tolerant_failure_reports_partial_rows() {
            let table = RecordTable::contiguous(100);
            table.fail_keys_containing(60, StrategyError::timeout("statement timeout"));

            let execution = strategy(&table, Some(2), FailurePolicy::Tolerant)
                .execute(100)
                .unwrap();

            assert_eq!(execution.rows, 50);
            assert_eq!(execution.chunk_failures.len(), 1);
            assert_eq!(table.stats().outstanding, 0);
        }
    }
}
