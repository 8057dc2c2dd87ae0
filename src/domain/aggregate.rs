use serde::{Deserialize, Serialize};

use super::result::StrategyResult;
use super::strategy_kind::StrategyKind;

/// Spread of one metric over repeated runs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub median: f64,
    pub mean: f64,
    /// Sample standard deviation (n - 1); zero for a single sample
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricSummary {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        let stddev = if n > 1 {
            let variance = sorted
                .iter()
                .map(|sample| {
                    let delta = sample - mean;
                    delta * delta
                })
                .sum::<f64>()
                / (n - 1) as f64;
            variance.sqrt()
        } else {
            0.0
        };

        Some(Self {
            median,
            mean,
            stddev,
            min: sorted[0],
            max: sorted[n - 1],
        })
    }
}

/// Statistics over every measured run of one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub strategy: StrategyKind,
    pub limit: u64,
    pub runs: u32,
    pub failed_runs: u32,
    pub rows_returned: u64,
    pub duration_seconds: MetricSummary,
    pub throughput_rows_per_sec: MetricSummary,
    pub peak_rss_bytes: Option<MetricSummary>,
    pub cpu_percent: Option<MetricSummary>,
    pub individual_runs: Vec<StrategyResult>,
}

/// Summarizes the completed runs; when every run failed, all runs are used so
/// the aggregate still reflects what was measured.
pub fn aggregate(results: &[StrategyResult]) -> Option<AggregatedResult> {
    let first = results.first()?;

    let completed: Vec<&StrategyResult> = results.iter().filter(|r| !r.is_failed()).collect();
    let basis: Vec<&StrategyResult> = if completed.is_empty() {
        results.iter().collect()
    } else {
        completed
    };

    let durations: Vec<f64> = basis.iter().map(|r| r.duration.as_secs_f64()).collect();
    let throughputs: Vec<f64> = basis.iter().map(|r| r.throughput_rows_per_sec).collect();
    let peaks: Vec<f64> = basis
        .iter()
        .filter_map(|r| r.peak_rss_bytes)
        .map(|bytes| bytes as f64)
        .collect();
    let cpus: Vec<f64> = basis.iter().filter_map(|r| r.cpu_percent).collect();

    Some(AggregatedResult {
        strategy: first.strategy,
        limit: first.limit,
        runs: results.len() as u32,
        failed_runs: results.iter().filter(|r| r.is_failed()).count() as u32,
        rows_returned: basis[0].rows_returned,
        duration_seconds: MetricSummary::from_samples(&durations)?,
        throughput_rows_per_sec: MetricSummary::from_samples(&throughputs)?,
        peak_rss_bytes: MetricSummary::from_samples(&peaks),
        cpu_percent: MetricSummary::from_samples(&cpus),
        individual_runs: results.to_vec(),
    })
}
