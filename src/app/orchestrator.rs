//! Drives warmup and measured runs for every selected strategy.
//!
//! Each run, warmup included, gets a fresh strategy instance that is closed
//! exactly once after it executes. Measured runs are wrapped in a
//! [`MeasurementBlock`](crate::profiler::MeasurementBlock); failures are
//! either recorded on the result (tolerant) or abort the sweep (strict).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AggregatedResult, ChunkFailure, ErrorKind, FailurePolicy, ProfileStats, RunConfig, StrategyError,
    StrategyKind, StrategyResult, SweepId, aggregate, throughput,
};
use crate::ports::{Execution, Strategy, StrategyFactory};
use crate::profiler::Profiler;

pub const TOLERANT_FAILURE_NOTE: &str = "Execution failed in tolerant mode; run continued.";

/// Everything one sweep measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub sweep_id: SweepId,
    pub started_at: DateTime<Utc>,
    pub limit: u64,
    pub strategies: Vec<StrategyKind>,
    pub failure_policy: FailurePolicy,
    pub runs: Vec<StrategyResult>,
    /// Present only when each strategy ran more than once
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<AggregatedResult>,
}

impl SweepReport {
    pub fn failed_runs(&self) -> usize {
        self.runs.iter().filter(|run| run.is_failed()).count()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{strategy} run {run} failed under strict policy: {source}")]
    Aborted {
        strategy: StrategyKind,
        run: u32,
        #[source]
        source: StrategyError,
    },
}

pub struct Orchestrator {
    factory: Arc<dyn StrategyFactory>,
    profiler: Profiler,
}

impl Orchestrator {
    pub fn new(factory: Arc<dyn StrategyFactory>, profiler: Profiler) -> Self {
        Self { factory, profiler }
    }

    pub fn run(&self, config: &RunConfig) -> Result<SweepReport, OrchestratorError> {
        let sweep_id = SweepId::new();
        let span = tracing::info_span!("sweep", sweep_id = %sweep_id);
        let _entered = span.enter();

        let started_at = Utc::now();
        let limit = config.rows();
        let strategies = config.strategies();
        let total_runs = strategies.len() as u32 * config.runs();
        let mut global_run = 0u32;
        let mut reference: Option<RowReference> = None;
        let mut runs = Vec::with_capacity(total_runs as usize);
        let mut aggregates = Vec::new();

        tracing::info!(
            limit,
            runs = config.runs(),
            warmup = config.warmup(),
            policy = %config.failure_policy(),
            strategies = strategies.len(),
            "sweep started"
        );

        for &kind in &strategies {
            tracing::info!(strategy = %kind, "strategy started");

            if config.warmup() {
                self.warmup(kind, limit);
            }

            let mut strategy_runs = Vec::with_capacity(config.runs() as usize);
            for run in 1..=config.runs() {
                global_run += 1;
                tracing::info!(
                    strategy = %kind,
                    run,
                    global_run,
                    total_runs,
                    limit,
                    "measurement started"
                );

                let measured = self.measured_run(kind, limit);
                let conflict = measured.conflict(limit, reference);
                let error = measured.error(run, limit, &mut reference);

                let mut result = match (error, config.failure_policy()) {
                    (None, _) => measured.into_result(run, limit, None),
                    (Some(error), FailurePolicy::Tolerant) => {
                        tracing::warn!(
                            strategy = %kind,
                            run,
                            kind = %error.kind,
                            error = %error.message,
                            "run failed; continuing"
                        );
                        measured.into_result(run, limit, Some(error))
                    }
                    (Some(error), FailurePolicy::Strict) => {
                        tracing::error!(
                            strategy = %kind,
                            run,
                            kind = %error.kind,
                            error = %error.message,
                            "run failed; aborting sweep"
                        );
                        return Err(OrchestratorError::Aborted {
                            strategy: kind,
                            run,
                            source: error,
                        });
                    }
                };

                if let Some(reference) = conflict {
                    result.extra.insert(
                        "row_reference".to_string(),
                        format!("{} run {}", reference.strategy, reference.run),
                    );
                    result
                        .extra
                        .insert("row_reference_rows".to_string(), reference.rows.to_string());
                }

                tracing::info!(
                    strategy = %kind,
                    run,
                    global_run,
                    total_runs,
                    rows = result.rows_returned,
                    duration_secs = result.duration.as_secs_f64(),
                    throughput_rps = result.throughput_rows_per_sec,
                    failed = result.is_failed(),
                    "measurement finished"
                );
                strategy_runs.push(result);
            }

            if config.runs() > 1
                && let Some(aggregated) = aggregate(&strategy_runs)
            {
                tracing::info!(
                    strategy = %kind,
                    runs = aggregated.runs,
                    failed_runs = aggregated.failed_runs,
                    median_duration = aggregated.duration_seconds.median,
                    stddev_duration = aggregated.duration_seconds.stddev,
                    median_throughput_rps = aggregated.throughput_rows_per_sec.median,
                    "runs aggregated"
                );
                aggregates.push(aggregated);
            }

            runs.extend(strategy_runs);
            tracing::info!(strategy = %kind, "strategy finished");
        }

        let report = SweepReport {
            sweep_id: sweep_id.clone(),
            started_at,
            limit,
            strategies,
            failure_policy: config.failure_policy(),
            runs,
            aggregates,
        };
        tracing::info!(
            runs = report.runs.len(),
            failed = report.failed_runs(),
            "sweep finished"
        );
        Ok(report)
    }

    /// One unmeasured execution to prime caches; failures only warn.
    fn warmup(&self, kind: StrategyKind, limit: u64) {
        tracing::info!(strategy = %kind, "warmup started");
        let mut instance = match self.factory.create(kind) {
            Ok(instance) => instance,
            Err(e) => {
                tracing::warn!(strategy = %kind, error = %e, "warmup failed");
                return;
            }
        };

        match instance.execute(limit) {
            Ok(execution) => {
                tracing::info!(strategy = %kind, rows = execution.rows, "warmup finished");
            }
            Err(e) => tracing::warn!(strategy = %kind, error = %e, "warmup failed"),
        }
        close(kind, instance.as_mut());
    }

    fn measured_run(&self, kind: StrategyKind, limit: u64) -> Measured {
        let mut instance = match self.factory.create(kind) {
            Ok(instance) => instance,
            Err(e) => {
                return Measured {
                    kind,
                    outcome: Err(e),
                    stats: None,
                };
            }
        };

        let block = self.profiler.start_with(kind.as_str(), kind.spawns_workers());
        let outcome = instance.execute(limit);
        let stats = block.finish();

        close(kind, instance.as_mut());

        Measured {
            kind,
            outcome,
            stats: Some(stats),
        }
    }
}

/// Best-effort close; a failure is logged and never replaces the run's outcome.
fn close(kind: StrategyKind, instance: &mut dyn Strategy) {
    if let Some(closer) = instance.closer()
        && let Err(e) = closer.close()
    {
        tracing::warn!(strategy = %kind, error = %e, "close failed");
    }
}

/// The first clean run of a sweep. Later clean runs are compared against it;
/// a disagreement fails the later run without deciding which side is wrong.
#[derive(Debug, Clone, Copy)]
struct RowReference {
    strategy: StrategyKind,
    run: u32,
    rows: u64,
}

struct Measured {
    kind: StrategyKind,
    outcome: Result<Execution, StrategyError>,
    stats: Option<ProfileStats>,
}

impl Measured {
    /// The error this run is recorded with, if any. A clean run becomes the
    /// sweep's row-count reference when none is set yet.
    fn error(
        &self,
        run: u32,
        limit: u64,
        reference: &mut Option<RowReference>,
    ) -> Option<StrategyError> {
        let execution = match &self.outcome {
            Ok(execution) => execution,
            Err(e) => return Some(e.clone()),
        };

        if let Some(first) = execution.chunk_failures.first() {
            return Some(summarize_chunk_failures(first, &execution.chunk_failures));
        }
        if execution.rows > limit {
            return Some(StrategyError::new(
                ErrorKind::RowCountMismatch,
                format!("returned {} rows for limit {}", execution.rows, limit),
            ));
        }
        if let Some(other) = self.conflict(limit, *reference) {
            return Some(StrategyError::new(
                ErrorKind::RowCountMismatch,
                format!(
                    "row counts disagree: {} run {} returned {}, {} run {} returned {}",
                    self.kind, run, execution.rows, other.strategy, other.run, other.rows
                ),
            ));
        }
        if reference.is_none() {
            tracing::debug!(strategy = %self.kind, run, rows = execution.rows, "row-count reference set");
            *reference = Some(RowReference {
                strategy: self.kind,
                run,
                rows: execution.rows,
            });
        }
        None
    }

    /// The reference this otherwise clean run disagrees with.
    fn conflict(&self, limit: u64, reference: Option<RowReference>) -> Option<RowReference> {
        let execution = self.outcome.as_ref().ok()?;
        if !execution.chunk_failures.is_empty() || execution.rows > limit {
            return None;
        }
        reference.filter(|reference| reference.rows != execution.rows)
    }

    fn into_result(self, run: u32, limit: u64, error: Option<StrategyError>) -> StrategyResult {
        let (rows, notes, mut extra) = match self.outcome {
            Ok(execution) => (execution.rows, execution.notes, execution.extra),
            Err(_) => (0, None, BTreeMap::new()),
        };

        let notes = match &error {
            Some(_) => Some(match notes {
                Some(notes) => format!("{} {}", TOLERANT_FAILURE_NOTE, notes),
                None => TOLERANT_FAILURE_NOTE.to_string(),
            }),
            None => notes,
        };
        if let Some(error) = &error {
            extra.insert("failed".to_string(), "true".to_string());
            extra.insert("error_type".to_string(), error.kind.to_string());
            extra.insert(
                "failure_policy".to_string(),
                FailurePolicy::Tolerant.to_string(),
            );
        }

        let duration = self
            .stats
            .as_ref()
            .map_or(Duration::ZERO, |stats| stats.duration);
        StrategyResult {
            strategy: self.kind,
            run,
            limit,
            rows_returned: rows,
            duration,
            throughput_rows_per_sec: throughput(rows, duration),
            peak_rss_bytes: self.stats.as_ref().and_then(|stats| stats.peak_rss_bytes),
            peak_traced_bytes: self.stats.as_ref().and_then(|stats| stats.peak_traced_bytes),
            cpu_percent: self.stats.as_ref().and_then(|stats| stats.cpu_percent),
            error: error.map(|error| error.descriptor()),
            notes,
            extra,
        }
    }
}

fn summarize_chunk_failures(first: &ChunkFailure, failures: &[ChunkFailure]) -> StrategyError {
    let summary: Vec<String> = failures.iter().take(3).map(ChunkFailure::describe).collect();
    let mut message = summary.join("; ");
    if failures.len() > 3 {
        message.push_str(&format!(" (+{} more)", failures.len() - 3));
    }
    StrategyError::new(first.error.kind, message)
}
