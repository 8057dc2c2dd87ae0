use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::error::ErrorDescriptor;
use super::strategy_kind::StrategyKind;

/// Record of one measured execution of one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    pub strategy: StrategyKind,
    /// 1-based index within the strategy's measured runs
    pub run: u32,
    pub limit: u64,
    pub rows_returned: u64,
    #[serde(with = "duration_secs", rename = "duration_seconds")]
    pub duration: Duration,
    pub throughput_rows_per_sec: f64,
    pub peak_rss_bytes: Option<u64>,
    pub peak_traced_bytes: Option<u64>,
    pub cpu_percent: Option<f64>,
    pub error: Option<ErrorDescriptor>,
    pub notes: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl StrategyResult {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

pub fn throughput(rows: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 { rows as f64 / secs } else { 0.0 }
}

/// Serde helpers storing a `Duration` as fractional seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
