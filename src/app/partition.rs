//! Two-phase ID partitioning shared by the fan-out strategies.
//!
//! Phase 1 snapshots partition keys (optionally in keyset windows); phase 2
//! splits each snapshot into chunks and runs them with bounded concurrency.
//! A window is fully drained before the next one is requested, so at most one
//! window of keys is held at a time.

use std::future::Future;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::domain::{
    ChunkFailure, Chunking, FailurePolicy, IdRange, IdWindowing, StatementTimeout, StrategyError,
};
use crate::ports::AsyncConnection;

/// Where Phase-1 keys come from.
#[async_trait]
pub trait IdSource: Send {
    async fn next_ids(&mut self, range: IdRange) -> Result<Vec<i64>, StrategyError>;
}

/// Keys read over an async connection under a statement timeout.
pub struct ConnectionIds<'a> {
    connection: &'a mut dyn AsyncConnection,
    timeout: StatementTimeout,
}

impl<'a> ConnectionIds<'a> {
    pub fn new(connection: &'a mut dyn AsyncConnection, timeout: StatementTimeout) -> Self {
        Self {
            connection,
            timeout,
        }
    }
}

#[async_trait]
impl IdSource for ConnectionIds<'_> {
    async fn next_ids(&mut self, range: IdRange) -> Result<Vec<i64>, StrategyError> {
        self.connection.fetch_ids(range, self.timeout).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    pub chunking: Chunking,
    /// `None` always issues one unwindowed Phase-1 fetch.
    pub windowing: Option<IdWindowing>,
    pub max_in_flight: usize,
    pub policy: FailurePolicy,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartitionReport {
    pub ids_selected: u64,
    pub rows: u64,
    /// Non-empty key snapshots that were fanned out
    pub windows: u32,
    pub peak_ids_held: usize,
    pub chunks: usize,
    pub failures: Vec<ChunkFailure>,
}

/// Runs both phases for `limit` rows.
///
/// Under [`FailurePolicy::Strict`] the first chunk failure drops every
/// in-flight chunk future and is returned with its key span. Under
/// [`FailurePolicy::Tolerant`] all chunks run and failures are collected.
/// When a window finishes with no failed chunk, its row total must equal its
/// key count.
pub async fn run_partitioned<F, Fut>(
    limit: u64,
    source: &mut dyn IdSource,
    plan: &PartitionPlan,
    run_chunk: F,
) -> Result<PartitionReport, StrategyError>
where
    F: Fn(Vec<i64>) -> Fut,
    Fut: Future<Output = Result<u64, StrategyError>>,
{
    let mut report = PartitionReport::default();

    match plan.windowing.filter(|windowing| windowing.applies_to(limit)) {
        None => {
            let ids = source.next_ids(IdRange::first(limit)).await?;
            if !ids.is_empty() {
                fan_out_window(&ids, plan, &run_chunk, &mut report).await?;
            }
        }
        Some(windowing) => {
            let mut remaining = limit;
            let mut last_seen = None;
            while remaining > 0 {
                let range = IdRange {
                    after: last_seen,
                    limit: remaining.min(windowing.window),
                };
                let ids = source.next_ids(range).await?;
                let Some(&last) = ids.last() else {
                    break;
                };

                fan_out_window(&ids, plan, &run_chunk, &mut report).await?;

                remaining = remaining.saturating_sub(ids.len() as u64);
                last_seen = Some(last);
            }
        }
    }

    tracing::debug!(
        ids = report.ids_selected,
        rows = report.rows,
        windows = report.windows,
        chunks = report.chunks,
        failures = report.failures.len(),
        "partitioned read finished"
    );
    Ok(report)
}

async fn fan_out_window<F, Fut>(
    ids: &[i64],
    plan: &PartitionPlan,
    run_chunk: &F,
    report: &mut PartitionReport,
) -> Result<(), StrategyError>
where
    F: Fn(Vec<i64>) -> Fut,
    Fut: Future<Output = Result<u64, StrategyError>>,
{
    report.windows += 1;
    report.ids_selected += ids.len() as u64;
    report.peak_ids_held = report.peak_ids_held.max(ids.len());

    let chunks = plan.chunking.split(ids);
    report.chunks += chunks.len();

    let mut window_rows = 0u64;
    let mut window_failed = false;
    let mut in_flight = stream::iter(chunks.into_iter().map(|chunk| {
        let pending = run_chunk(chunk.to_vec());
        async move { (chunk, pending.await) }
    }))
    .buffer_unordered(plan.max_in_flight.max(1));

    while let Some((chunk, outcome)) = in_flight.next().await {
        match outcome {
            Ok(count) => window_rows += count,
            Err(err) => {
                let failure = ChunkFailure::new(chunk, err.descriptor());
                match plan.policy {
                    FailurePolicy::Strict => return Err(failure.to_error()),
                    FailurePolicy::Tolerant => {
                        tracing::warn!(chunk = %failure.describe(), kind = %err.kind, "chunk failed");
                        window_failed = true;
                        report.failures.push(failure);
                    }
                }
            }
        }
    }

    report.rows += window_rows;
    if !window_failed && window_rows != ids.len() as u64 {
        return Err(StrategyError::row_count_mismatch(
            ids.len() as u64,
            window_rows,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves ascending keys from a fixed table, recording each request.
    struct TableIds {
        ids: Vec<i64>,
        requests: Vec<IdRange>,
    }

    impl TableIds {
        fn new(ids: impl IntoIterator<Item = i64>) -> Self {
            Self {
                ids: ids.into_iter().collect(),
                requests: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl IdSource for TableIds {
        async fn next_ids(&mut self, range: IdRange) -> Result<Vec<i64>, StrategyError> {
            self.requests.push(range);
            Ok(self
                .ids
                .iter()
                .copied()
                .filter(|id| range.after.is_none_or(|after| *id > after))
                .take(range.limit as usize)
                .collect())
        }
    }

    fn plan(chunking: Chunking, windowing: Option<IdWindowing>, policy: FailurePolicy) -> PartitionPlan {
        PartitionPlan {
            chunking,
            windowing,
            max_in_flight: 4,
            policy,
        }
    }

    async fn count_rows(ids: Vec<i64>) -> Result<u64, StrategyError> {
        Ok(ids.len() as u64)
    }

    mod fan_out {
        use super::*;

        #[rstest]
        #[case(1)]
        #[case(100)]
        #[case(333)]
        #[case(50_000)]
        #[tokio::test]
        async fn chunk_counts_sum_to_key_count_over_gaps(#[case] chunk_size: usize) {
            let mut source = TableIds::new((1..=500).chain(1_000..=1_500));
            let plan = plan(Chunking::FixedSize(chunk_size), None, FailurePolicy::Strict);

            let report = run_partitioned(2_000, &mut source, &plan, count_rows)
                .await
                .unwrap();

            assert_eq!(report.ids_selected, 1_001);
            assert_eq!(report.rows, 1_001);
            assert_eq!(report.chunks, 1_001_usize.div_ceil(chunk_size));
            assert!(report.failures.is_empty());
        }

        #[tokio::test]
        async fn empty_table_reads_nothing() {
            let mut source = TableIds::new([]);
            let plan = plan(Chunking::FixedSize(10), None, FailurePolicy::Strict);

            let report = run_partitioned(100, &mut source, &plan, count_rows)
                .await
                .unwrap();

            assert_eq!(report, PartitionReport::default());
        }

        #[tokio::test]
        async fn short_chunk_is_row_count_mismatch() {
            let mut source = TableIds::new(1..=10);
            let plan = plan(Chunking::EvenSplit(2), None, FailurePolicy::Tolerant);

            let err = run_partitioned(10, &mut source, &plan, |ids: Vec<i64>| async move {
                Ok(ids.len() as u64 - u64::from(ids[0] == 1))
            })
            .await
            .unwrap_err();

            assert_eq!(err.kind, ErrorKind::RowCountMismatch);
        }

        #[tokio::test]
        async fn in_flight_chunks_never_exceed_limit() {
            let mut source = TableIds::new(1..=40);
            let mut plan = plan(Chunking::FixedSize(2), None, FailurePolicy::Strict);
            plan.max_in_flight = 3;
            let active = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));

            run_partitioned(40, &mut source, &plan, |ids: Vec<i64>| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(ids.len() as u64)
                }
            })
            .await
            .unwrap();

            assert!(peak.load(Ordering::SeqCst) <= 3);
        }
    }

    mod failure_policy {
        use super::*;

        async fn fail_on_second_chunk(ids: Vec<i64>) -> Result<u64, StrategyError> {
            if ids.contains(&11) {
                Err(StrategyError::timeout("canceling statement due to statement timeout"))
            } else {
                Ok(ids.len() as u64)
            }
        }

        #[tokio::test]
        async fn strict_returns_first_failure_with_key_span() {
            let mut source = TableIds::new(1..=30);
            let plan = plan(Chunking::FixedSize(10), None, FailurePolicy::Strict);

            let err = run_partitioned(30, &mut source, &plan, fail_on_second_chunk)
                .await
                .unwrap_err();

            assert_eq!(err.kind, ErrorKind::TimeoutFailure);
            assert!(err.message.starts_with("ids[10] 11..20:"));
        }

        #[tokio::test]
        async fn strict_cancels_siblings_still_in_flight() {
            let mut source = TableIds::new(1..=30);
            let plan = plan(Chunking::FixedSize(10), None, FailurePolicy::Strict);
            let finished = Arc::new(AtomicUsize::new(0));

            let result = run_partitioned(30, &mut source, &plan, |ids: Vec<i64>| {
                let finished = Arc::clone(&finished);
                async move {
                    if ids[0] == 1 {
                        return Err(StrategyError::connectivity("connection reset"));
                    }
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(ids.len() as u64)
                }
            })
            .await;

            assert!(result.is_err());
            assert_eq!(finished.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn tolerant_collects_failures_and_keeps_partial_rows() {
            let mut source = TableIds::new(1..=30);
            let plan = plan(Chunking::FixedSize(10), None, FailurePolicy::Tolerant);

            let report = run_partitioned(30, &mut source, &plan, fail_on_second_chunk)
                .await
                .unwrap();

            assert_eq!(report.rows, 20);
            assert_eq!(report.failures.len(), 1);
            assert_eq!(report.failures[0].first_id, Some(11));
            assert_eq!(report.failures[0].last_id, Some(20));
        }
    }

    mod guardrail {
        use super::*;

        #[tokio::test]
        async fn large_limit_is_fetched_in_bounded_windows() {
            let mut source = TableIds::new(1..=130_000);
            let plan = plan(
                Chunking::EvenSplit(4),
                Some(IdWindowing::default()),
                FailurePolicy::Strict,
            );

            let report = run_partitioned(120_000, &mut source, &plan, count_rows)
                .await
                .unwrap();

            assert_eq!(report.rows, 120_000);
            assert_eq!(report.windows, 6);
            assert!(report.peak_ids_held <= 20_000);
            assert!(source.requests.iter().all(|range| range.limit <= 20_000));
            assert_eq!(source.requests[0].after, None);
            assert_eq!(source.requests[1].after, Some(20_000));
        }

        #[tokio::test]
        async fn windows_continue_past_gaps_without_overlap() {
            let ids: Vec<i64> = (1..=30_000).chain(90_000..=150_000).collect();
            let mut source = TableIds::new(ids.clone());
            let plan = plan(
                Chunking::EvenSplit(3),
                Some(IdWindowing::default()),
                FailurePolicy::Strict,
            );
            let seen = std::sync::Mutex::new(Vec::new());

            let report = run_partitioned(60_000, &mut source, &plan, |chunk: Vec<i64>| {
                let count = chunk.len() as u64;
                seen.lock().unwrap().extend(chunk);
                async move { Ok(count) }
            })
            .await
            .unwrap();

            let mut seen = seen.into_inner().unwrap();
            seen.sort_unstable();
            assert_eq!(report.rows, 60_000);
            assert_eq!(seen, ids[..60_000].to_vec());
        }

        #[tokio::test]
        async fn short_table_stops_when_keys_run_out() {
            let mut source = TableIds::new(1..=55_000);
            let plan = plan(
                Chunking::EvenSplit(2),
                Some(IdWindowing::default()),
                FailurePolicy::Strict,
            );

            let report = run_partitioned(120_000, &mut source, &plan, count_rows)
                .await
                .unwrap();

            assert_eq!(report.rows, 55_000);
            assert_eq!(report.windows, 3);
        }

        #[tokio::test]
        async fn limit_at_or_below_threshold_issues_one_unwindowed_fetch() {
            let mut source = TableIds::new(1..=60_000);
            let plan = plan(
                Chunking::EvenSplit(4),
                Some(IdWindowing::default()),
                FailurePolicy::Strict,
            );

            let report = run_partitioned(10_000, &mut source, &plan, count_rows)
                .await
                .unwrap();

            assert_eq!(source.requests, vec![IdRange::first(10_000)]);
            assert_eq!(report.windows, 1);
            assert_eq!(report.chunks, 4);
        }
    }
}
