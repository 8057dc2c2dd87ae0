//! Scoped performance sampling around one unit of work.
//!
//! A [`MeasurementBlock`] takes an entry snapshot, keeps a background thread
//! polling resident memory at a fixed interval, and takes an exit snapshot on
//! [`MeasurementBlock::finish`]. Dropping an unfinished block still stops and
//! joins the sampler.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::domain::{ProfileSample, ProfileStats, peak_rss};
use crate::ports::{AllocationTracker, ResourceProbe, ResourceSnapshot};

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfilerOptions {
    pub sample_interval: Duration,
    pub track_children: bool,
    pub trace_allocations: bool,
}

impl Default for ProfilerOptions {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            track_children: false,
            trace_allocations: false,
        }
    }
}

#[derive(Clone)]
pub struct Profiler {
    probe: Arc<dyn ResourceProbe>,
    tracker: Option<Arc<dyn AllocationTracker>>,
    options: ProfilerOptions,
}

impl Profiler {
    pub fn new(probe: Arc<dyn ResourceProbe>) -> Self {
        Self {
            probe,
            tracker: None,
            options: ProfilerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ProfilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_allocation_tracker(mut self, tracker: Arc<dyn AllocationTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn options(&self) -> ProfilerOptions {
        self.options
    }

    pub fn start(&self, label: impl Into<String>) -> MeasurementBlock {
        self.start_with(label, self.options.track_children)
    }

    /// Like [`Profiler::start`], overriding whether child processes are measured.
    pub fn start_with(&self, label: impl Into<String>, track_children: bool) -> MeasurementBlock {
        let tracker = if self.options.trace_allocations {
            self.tracker.clone()
        } else {
            None
        };
        MeasurementBlock::enter(
            label.into(),
            Arc::clone(&self.probe),
            tracker,
            track_children,
            self.options.sample_interval,
        )
    }

    /// Measures `work` and returns its output alongside the stats.
    pub fn measure<T>(&self, label: impl Into<String>, work: impl FnOnce() -> T) -> (T, ProfileStats) {
        let block = self.start(label);
        let output = work();
        (output, block.finish())
    }
}

pub struct MeasurementBlock {
    label: String,
    probe: Arc<dyn ResourceProbe>,
    tracker: Option<Arc<dyn AllocationTracker>>,
    include_children: bool,
    entry: ResourceSnapshot,
    started: Instant,
    sampler: Option<Sampler>,
}

impl MeasurementBlock {
    fn enter(
        label: String,
        probe: Arc<dyn ResourceProbe>,
        tracker: Option<Arc<dyn AllocationTracker>>,
        include_children: bool,
        interval: Duration,
    ) -> Self {
        if let Some(tracker) = &tracker {
            tracker.reset_peak();
        }
        // Wall clock and CPU baseline are read together.
        let started = Instant::now();
        let entry = probe.snapshot(include_children);
        let sampler = Sampler::spawn(Arc::clone(&probe), include_children, interval);

        Self {
            label,
            probe,
            tracker,
            include_children,
            entry,
            started,
            sampler,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn finish(mut self) -> ProfileStats {
        let duration = self.started.elapsed();
        let exit = self.probe.snapshot(self.include_children);
        let samples = self.sampler.take().map(Sampler::stop).unwrap_or_default();

        let peak_rss_bytes = [self.entry.rss_bytes, exit.rss_bytes]
            .into_iter()
            .chain(peak_rss(&samples))
            .max();

        ProfileStats {
            label: std::mem::take(&mut self.label),
            duration,
            peak_rss_bytes,
            peak_traced_bytes: self.tracker.as_ref().map(|tracker| tracker.peak_bytes()),
            cpu_percent: cpu_percent(self.entry, exit, duration),
            samples: samples.len(),
        }
    }
}

impl Drop for MeasurementBlock {
    fn drop(&mut self) {
        if let Some(sampler) = self.sampler.take() {
            sampler.stop();
        }
    }
}

fn cpu_percent(entry: ResourceSnapshot, exit: ResourceSnapshot, wall: Duration) -> Option<f64> {
    let (Some(before), Some(after)) = (entry.cpu_time, exit.cpu_time) else {
        return None;
    };
    let wall = wall.as_secs_f64();
    if wall <= 0.0 {
        return None;
    }
    Some(after.saturating_sub(before).as_secs_f64() / wall * 100.0)
}

struct Sampler {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<Vec<ProfileSample>>,
}

impl Sampler {
    fn spawn(
        probe: Arc<dyn ResourceProbe>,
        include_children: bool,
        interval: Duration,
    ) -> Option<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let spawned = std::thread::Builder::new()
            .name("readbench-sampler".to_string())
            .spawn(move || {
                let mut samples = Vec::new();
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                    let snapshot = probe.snapshot(include_children);
                    samples.push(ProfileSample::new(Instant::now(), snapshot.rss_bytes));
                }
                samples
            });

        match spawned {
            Ok(handle) => Some(Self { stop, handle }),
            Err(e) => {
                tracing::warn!(error = %e, "memory sampler unavailable; peak uses entry/exit only");
                None
            }
        }
    }

    fn stop(self) -> Vec<ProfileSample> {
        // A closed channel also ends the loop, so a failed send is fine.
        let _ = self.stop.send(());
        self.handle.join().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FixedTracker, ScriptedProbe};
    use std::sync::atomic::Ordering;

    fn fast_options() -> ProfilerOptions {
        ProfilerOptions {
            sample_interval: Duration::from_millis(5),
            ..ProfilerOptions::default()
        }
    }

    fn wait_for_calls(probe: &ScriptedProbe, calls: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while probe.calls() < calls && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    mod finish {
        use super::*;

        #[test]
        fn peak_is_at_least_entry_and_exit() {
            // entry 300, no samples consumed from script, exit 700
            let probe = Arc::new(ScriptedProbe::new(700, [300]));
            let profiler = Profiler::new(probe).with_options(ProfilerOptions {
                sample_interval: Duration::from_secs(60),
                ..ProfilerOptions::default()
            });

            let stats = profiler.start("naive").finish();

            assert_eq!(stats.peak_rss_bytes, Some(700));
            assert_eq!(stats.label, "naive");
        }

        #[test]
        fn captures_mid_block_spike() {
            // entry, first sample spikes, everything after is back to baseline
            let probe = Arc::new(ScriptedProbe::new(100, [100, 9_000]));
            let profiler = Profiler::new(Arc::clone(&probe) as Arc<dyn ResourceProbe>)
                .with_options(fast_options());

            let block = profiler.start("spike");
            wait_for_calls(&probe, 3);
            let stats = block.finish();

            assert_eq!(stats.peak_rss_bytes, Some(9_000));
            assert!(stats.samples >= 2);
        }

        #[test]
        fn cpu_percent_is_cpu_delta_over_wall_time() {
            let probe = Arc::new(ScriptedProbe::constant(1).with_cpu_step(Duration::from_millis(1)));
            let profiler = Profiler::new(probe).with_options(ProfilerOptions {
                sample_interval: Duration::from_secs(60),
                ..ProfilerOptions::default()
            });

            let block = profiler.start("cpu");
            std::thread::sleep(Duration::from_millis(20));
            let stats = block.finish();

            let cpu = stats.cpu_percent.unwrap();
            assert!(cpu > 0.0);
            assert!(cpu <= 100.0);
        }

        /// Reads CPU time first, then stalls like a slow RSS refresh.
        struct SlowProbe {
            origin: Instant,
            stall: Duration,
        }

        impl ResourceProbe for SlowProbe {
            fn snapshot(&self, _include_children: bool) -> ResourceSnapshot {
                let cpu_time = Some(self.origin.elapsed());
                std::thread::sleep(self.stall);
                ResourceSnapshot {
                    rss_bytes: 1,
                    cpu_time,
                }
            }
        }

        #[test]
        fn slow_snapshots_do_not_skew_cpu_percent() {
            let probe = Arc::new(SlowProbe {
                origin: Instant::now(),
                stall: Duration::from_millis(40),
            });
            let profiler = Profiler::new(probe).with_options(ProfilerOptions {
                sample_interval: Duration::from_secs(60),
                ..ProfilerOptions::default()
            });

            let block = profiler.start("busy");
            std::thread::sleep(Duration::from_millis(20));
            let stats = block.finish();

            // CPU advances with the wall clock, so a fully busy block reads ~100%.
            let cpu = stats.cpu_percent.unwrap();
            assert!((90.0..=110.0).contains(&cpu), "cpu_percent = {cpu}");
        }

        #[test]
        fn allocation_peak_only_when_tracing_enabled() {
            let tracker = Arc::new(FixedTracker::default());
            tracker.peak.store(4_096, Ordering::SeqCst);
            let probe = Arc::new(ScriptedProbe::constant(1));

            let untraced = Profiler::new(probe.clone())
                .with_allocation_tracker(tracker.clone())
                .start("off")
                .finish();
            assert_eq!(untraced.peak_traced_bytes, None);

            let traced = Profiler::new(probe)
                .with_allocation_tracker(tracker.clone())
                .with_options(ProfilerOptions {
                    trace_allocations: true,
                    ..ProfilerOptions::default()
                })
                .start("on")
                .finish();
            assert_eq!(traced.peak_traced_bytes, Some(4_096));
            assert_eq!(tracker.resets.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn dropping_unfinished_block_stops_sampler() {
        let probe = Arc::new(ScriptedProbe::constant(1));
        let profiler =
            Profiler::new(Arc::clone(&probe) as Arc<dyn ResourceProbe>).with_options(fast_options());

        let block = profiler.start("dropped");
        wait_for_calls(&probe, 2);
        drop(block);

        let after_drop = probe.calls();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(probe.calls(), after_drop);
    }

    #[test]
    fn measure_returns_work_output() {
        let profiler = Profiler::new(Arc::new(ScriptedProbe::constant(42)));

        let (value, stats) = profiler.measure("work", || 7 * 6);

        assert_eq!(value, 42);
        assert_eq!(stats.peak_rss_bytes, Some(42));
    }
}
