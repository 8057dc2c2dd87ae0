use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// One resident-memory observation taken by a measurement block's sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSample {
    pub at: Instant,
    pub rss_bytes: u64,
}

impl ProfileSample {
    pub fn new(at: Instant, rss_bytes: u64) -> Self {
        Self { at, rss_bytes }
    }
}

/// Highest resident memory over a set of samples, or `None` when empty.
pub fn peak_rss(samples: &[ProfileSample]) -> Option<u64> {
    samples.iter().map(|sample| sample.rss_bytes).max()
}

/// Measurements produced by one measurement block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileStats {
    pub label: String,
    #[serde(with = "super::result::duration_secs", rename = "duration_seconds")]
    pub duration: Duration,
    pub peak_rss_bytes: Option<u64>,
    pub peak_traced_bytes: Option<u64>,
    pub cpu_percent: Option<f64>,
    pub samples: usize,
}
