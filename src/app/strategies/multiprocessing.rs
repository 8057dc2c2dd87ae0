use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;

use crate::domain::{Chunking, FailurePolicy, StatementTimeout, StrategyError, StrategyKind};
use crate::partition::{ConnectionIds, PartitionPlan, run_partitioned};
use crate::ports::{AsyncConnector, ChunkTask, Execution, Strategy, WorkerLauncher};
use crate::registry::StrategyContext;

use super::{current_thread_runtime, with_chunk_failures};

/// Snapshots keys once, then fans fixed-size key chunks out to worker
/// processes, at most `processes` at a time.
pub struct MultiprocessingStrategy {
    dsn: String,
    connector: Arc<dyn AsyncConnector>,
    workers: Arc<dyn WorkerLauncher>,
    processes: usize,
    chunk_size: usize,
    batch_size: u32,
    timeout: StatementTimeout,
    policy: FailurePolicy,
    fan_out_timeout: Duration,
    runtime: Option<Runtime>,
}

impl MultiprocessingStrategy {
    pub fn new(context: StrategyContext) -> Self {
        Self {
            processes: context.worker_processes(),
            dsn: context.dsn,
            connector: context.async_connector,
            workers: context.workers,
            chunk_size: context.tuning.chunk_size.max(1),
            batch_size: context.tuning.batch_size,
            timeout: context.statement_timeout,
            policy: context.failure_policy,
            fan_out_timeout: context.tuning.fan_out_timeout,
            runtime: None,
        }
    }
}

impl Strategy for MultiprocessingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Multiprocessing
    }

    fn execute(&mut self, limit: u64) -> Result<Execution, StrategyError> {
        let runtime = current_thread_runtime(&mut self.runtime)?;
        let plan = PartitionPlan {
            chunking: Chunking::FixedSize(self.chunk_size),
            windowing: None,
            max_in_flight: self.processes,
            policy: self.policy,
        };
        let dsn = self.dsn.as_str();
        let connector = self.connector.as_ref();
        let workers = self.workers.as_ref();
        let (timeout, batch_size, fan_out_timeout) =
            (self.timeout, self.batch_size, self.fan_out_timeout);

        let report = runtime.block_on(async {
            let fan_out = async {
                let mut coordinator = connector.connect().await?;
                let mut source = ConnectionIds::new(coordinator.as_mut(), timeout);
                run_partitioned(limit, &mut source, &plan, move |ids| {
                    workers.run_chunk(ChunkTask {
                        dsn: dsn.to_string(),
                        ids,
                        statement_timeout_ms: timeout.as_millis(),
                        batch_size,
                    })
                })
                .await
            };
            // Dropping the fan-out on expiry kills every outstanding worker.
            tokio::time::timeout(fan_out_timeout, fan_out)
                .await
                .unwrap_or_else(|_| {
                    Err(StrategyError::timeout(format!(
                        "workers timed out after {}s",
                        fan_out_timeout.as_secs()
                    )))
                })
        })?;

        let execution = Execution::rows(report.rows)
            .with_notes(format!(
                "Worker processes={}, chunk_size={}, ids={}",
                self.processes, self.chunk_size, report.ids_selected
            ))
            .with_extra("processes", self.processes)
            .with_extra("chunk_size", self.chunk_size)
            .with_extra("ids_selected", report.ids_selected)
            .with_extra("chunks", report.chunks);
        Ok(with_chunk_failures(execution, report.failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::registry::Tuning;
    use crate::testing::{FakeAsyncConnector, FakeSyncConnector, FakeWorkers, RecordTable};
    use rstest::rstest;

    struct Harness {
        table: RecordTable,
        workers: Arc<FakeWorkers>,
    }

    impl Harness {
        fn new(table: RecordTable) -> Self {
            let workers = Arc::new(FakeWorkers::new(table.clone()));
            Self { table, workers }
        }

        fn strategy(&self, chunk_size: usize, policy: FailurePolicy) -> MultiprocessingStrategy {
            let mut context = StrategyContext::new(
                "postgresql://bench:secret@db/bench",
                Arc::new(FakeSyncConnector::new(self.table.clone())),
                Arc::new(FakeAsyncConnector::new(self.table.clone())),
                self.workers.clone(),
            )
            .with_tuning(Tuning {
                chunk_size,
                processes: Some(3),
                ..Tuning::default()
            });
            context.failure_policy = policy;
            context.statement_timeout = StatementTimeout::from_millis(1_500);
            MultiprocessingStrategy::new(context)
        }
    }

    #[rstest]
    #[case(1)]
    #[case(64)]
    #[case(500)]
    #[case(50_000)]
    fn chunk_counts_sum_to_gapped_key_count(#[case] chunk_size: usize) {
        let harness = Harness::new(RecordTable::from_ids((1..=500).chain(1_000..=1_500)));

        let execution = harness
            .strategy(chunk_size, FailurePolicy::Strict)
            .execute(10_000)
            .unwrap();

        assert_eq!(execution.rows, 1_001);
        assert_eq!(execution.extra["ids_selected"], "1001");
        let tasks = harness.workers.tasks();
        assert_eq!(tasks.len(), 1_001_usize.div_ceil(chunk_size));
        assert!(tasks.iter().all(|task| task.ids.len() <= chunk_size));
    }

    #[test]
    fn tasks_carry_connection_and_timeout() {
        let harness = Harness::new(RecordTable::contiguous(10));

        harness
            .strategy(4, FailurePolicy::Strict)
            .execute(10)
            .unwrap();

        let task = &harness.workers.tasks()[0];
        assert_eq!(task.dsn, "postgresql://bench:secret@db/bench");
        assert_eq!(task.statement_timeout_ms, 1_500);
        assert_eq!(task.batch_size, 10_000);
    }

    #[test]
    fn phase_one_is_a_single_unwindowed_fetch() {
        let harness = Harness::new(RecordTable::contiguous(120_000));

        let execution = harness
            .strategy(50_000, FailurePolicy::Strict)
            .execute(100_000)
            .unwrap();

        assert_eq!(execution.rows, 100_000);
        assert_eq!(harness.table.stats().id_requests.len(), 1);
    }

    #[test]
    fn empty_table_returns_zero_rows() {
        let harness = Harness::new(RecordTable::from_ids([]));

        let execution = harness
            .strategy(10, FailurePolicy::Strict)
            .execute(100)
            .unwrap();

        assert_eq!(execution.rows, 0);
        assert!(harness.workers.tasks().is_empty());
    }

    #[test]
    fn strict_worker_failure_fails_the_run() {
        let harness = Harness::new(RecordTable::contiguous(100));
        harness
            .table
            .fail_keys_containing(42, StrategyError::connectivity("server closed the connection"));

        let err = harness
            .strategy(10, FailurePolicy::Strict)
            .execute(100)
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ConnectivityFailure);
        assert!(err.message.contains("41..50"));
    }

    #[test]
    fn tolerant_worker_failure_keeps_partial_count() {
        let harness = Harness::new(RecordTable::contiguous(100));
        harness
            .table
            .fail_keys_containing(42, StrategyError::timeout("statement timeout"));

        let execution = harness
            .strategy(10, FailurePolicy::Tolerant)
            .execute(100)
            .unwrap();

        assert_eq!(execution.rows, 90);
        assert_eq!(execution.chunk_failures.len(), 1);
        assert!(execution.notes.unwrap().contains("errors=1"));
    }
}
