use std::time::Duration;

/// Point-in-time reading of process resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSnapshot {
    pub rss_bytes: u64,
    /// Cumulative user + system CPU time, when the platform reports it
    pub cpu_time: Option<Duration>,
}

pub trait ResourceProbe: Send + Sync {
    /// `include_children` adds descendant processes to both memory and CPU.
    fn snapshot(&self, include_children: bool) -> ResourceSnapshot;
}

/// Live-heap accounting used for allocation tracing.
pub trait AllocationTracker: Send + Sync {
    /// Restarts peak tracking from the current live size.
    fn reset_peak(&self);

    /// Highest live heap size since the last reset.
    fn peak_bytes(&self) -> u64;
}
