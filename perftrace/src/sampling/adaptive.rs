use super::ticker::{spawn_periodic, PeriodicTask, SamplerError};
use super::{MemoryReadings, ResourceProbe, Sampler, SamplingRate, SysinfoProbe};
use crate::{Collector, Timestamp};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Traffic is measured over traces started within this window.
pub const TRAFFIC_WINDOW: Duration = Duration::from_secs(60);
pub const HISTORY_LIMIT: usize = 100;
/// Largest change applied by one adjustment, in either direction.
pub const MAX_RATE_STEP: f64 = 0.3;
pub const DEFAULT_TRACE_SIZE_BYTES: f64 = 1024.0;
pub const DEFAULT_CPU_USAGE: f64 = 0.5;

const LARGE_TRACE_BYTES: f64 = 100.0 * 1024.0;
const SIZE_SAMPLE_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Setters)]
#[serde(rename_all = "camelCase", default)]
pub struct AdaptiveSamplingConfig {
    /// when false every trace is sampled and no adjustment runs
    pub enabled: bool,
    /// overrides the collector's configured rate on construction
    #[setters(strip_option)]
    pub initial_rate: Option<f64>,
    pub min_rate: f64,
    pub max_rate: f64,
    pub target_traces_per_second: f64,
    pub max_memory_bytes: u64,
    pub adjustment_interval: Duration,
    /// scales every term of the adjustment
    pub aggressiveness: f64,
}

impl Default for AdaptiveSamplingConfig {
    fn default() -> Self {
        Self{
            enabled: true,
            initial_rate: None,
            min_rate: 0.01,
            max_rate: 1.0,
            target_traces_per_second: 100.0,
            max_memory_bytes: 512 * 1024 * 1024,
            adjustment_interval: Duration::from_secs(30),
            aggressiveness: 1.0,
        }
    }
}

/// Snapshot of the load signals the sampler reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingMetrics {
    pub traces_per_second: f64,
    pub avg_trace_size_bytes: f64,
    pub memory_bytes: u64,
    /// fraction of one core used since the previous snapshot
    pub cpu_usage: f64,
    /// fraction of retained traces that ended with status error
    pub error_rate: f64,
    pub sampling_rate: f64,
    pub timestamp: Timestamp,
}

/// Rate change suggested by `metrics`, clamped to `±MAX_RATE_STEP`.
///
/// Heavy traffic, memory pressure, CPU pressure and large traces push the rate
/// down; light traffic and a high error fraction push it up.
pub fn rate_delta(metrics: &SamplingMetrics, config: &AdaptiveSamplingConfig) -> f64 {
    let aggressiveness = config.aggressiveness;
    let mut delta = 0.0;

    if config.target_traces_per_second > 0.0 {
        let load = metrics.traces_per_second / config.target_traces_per_second;
        if load > 1.2 {
            delta -= 0.1 * (load - 1.0) * aggressiveness;
        } else if load < 0.8 {
            delta += 0.05 * (1.0 - load) * aggressiveness;
        }
    }

    if config.max_memory_bytes > 0 {
        let memory = metrics.memory_bytes as f64 / config.max_memory_bytes as f64;
        if memory > 0.8 {
            delta -= 0.5 * (memory - 0.8) * aggressiveness;
        }
    }

    if metrics.error_rate > 0.05 {
        delta += 2.0 * (metrics.error_rate - 0.05) * aggressiveness;
    }

    if metrics.cpu_usage > 0.8 {
        delta -= 0.5 * (metrics.cpu_usage - 0.8) * aggressiveness;
    }

    if metrics.avg_trace_size_bytes > LARGE_TRACE_BYTES {
        let oversize = 0.05 * (metrics.avg_trace_size_bytes / LARGE_TRACE_BYTES - 1.0);
        delta -= oversize.min(0.2) * aggressiveness;
    }

    if delta.is_nan() { return 0.0 }
    delta.max(-MAX_RATE_STEP).min(MAX_RATE_STEP)
}

struct ControllerState {
    last_adjustment_nanos: Option<u64>,
    last_cpu_sample: Option<(u64, Duration)>,
    metrics: SamplingMetrics,
    history: VecDeque<SamplingMetrics>,
    memory_readings: Option<MemoryReadings>,
}

struct AdaptiveInner {
    config: AdaptiveSamplingConfig,
    collector: Arc<Collector>,
    rate: SamplingRate,
    probe: Arc<dyn ResourceProbe>,
    state: Mutex<ControllerState>,
}

impl AdaptiveInner {
    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self, state: &mut ControllerState, now: Timestamp) -> SamplingMetrics {
        let window_start = now.wall_ms.saturating_sub(TRAFFIC_WINDOW.as_millis() as u64);
        let summary = self.collector.summarize(window_start);
        let error_rate = match summary.retained {
            0 => 0.0,
            retained => summary.errored as f64 / retained as f64,
        };

        let memory_bytes = state.memory_readings.as_ref()
            .and_then(MemoryReadings::latest)
            .or_else(|| self.probe.memory_bytes())
            .unwrap_or_else(|| {
                #[cfg(feature = "log")]
                log::warn!("memory reading unavailable, assuming 0 bytes");
                0
            });

        let metrics = SamplingMetrics{
            traces_per_second: summary.started_since as f64 / TRAFFIC_WINDOW.as_secs_f64(),
            avg_trace_size_bytes: self.average_trace_size(),
            memory_bytes,
            cpu_usage: self.cpu_usage(state, now),
            error_rate,
            sampling_rate: self.rate.get(),
            timestamp: now,
        };
        state.metrics = metrics;
        metrics
    }

    fn average_trace_size(&self) -> f64 {
        let traces = self.collector.recent_traces(SIZE_SAMPLE_LIMIT);
        if traces.is_empty() { return 0.0 }

        let mut total = 0;
        for trace in &traces {
            match serde_json::to_vec(trace) {
                Ok(bytes) => total += bytes.len(),
                Err(_err) => {
                    #[cfg(feature = "log")]
                    log::warn!("could not estimate trace size: {_err}");
                    return DEFAULT_TRACE_SIZE_BYTES
                }
            }
        }
        total as f64 / traces.len() as f64
    }

    fn cpu_usage(&self, state: &mut ControllerState, now: Timestamp) -> f64 {
        let Some(cpu_time) = self.probe.cpu_time() else {
            #[cfg(feature = "log")]
            log::warn!("cpu time unavailable, assuming usage {DEFAULT_CPU_USAGE}");
            return DEFAULT_CPU_USAGE
        };
        let Some((previous_nanos, previous_cpu)) = state.last_cpu_sample.replace((now.nanos, cpu_time)) else {
            return DEFAULT_CPU_USAGE
        };
        let elapsed = now.nanos.saturating_sub(previous_nanos);
        if elapsed == 0 {
            return state.metrics.cpu_usage
        }
        let used = cpu_time.saturating_sub(previous_cpu).as_nanos() as f64;
        (used / elapsed as f64).clamp(0.0, 1.0)
    }

    fn adjust(&self, rate_limited: bool) -> bool {
        let now = self.collector.now();
        let mut state = self.lock_state();

        if rate_limited {
            if let Some(last) = state.last_adjustment_nanos {
                let interval = u64::try_from(self.config.adjustment_interval.as_nanos()).unwrap_or(u64::MAX);
                if now.nanos.saturating_sub(last) < interval {
                    return false
                }
            }
        }

        let mut metrics = self.refresh(&mut state, now);
        let previous = self.rate.get();
        let delta = rate_delta(&metrics, &self.config);
        let next = (previous + delta).max(self.config.min_rate).min(self.config.max_rate);
        self.rate.set(next);

        metrics.sampling_rate = self.rate.get();
        state.metrics = metrics;
        state.last_adjustment_nanos = Some(now.nanos);
        state.history.push_back(metrics);
        while state.history.len() > HISTORY_LIMIT {
            state.history.pop_front();
        }

        #[cfg(feature = "log")]
        log::debug!("sampling rate {previous:.3} -> {:.3} (tps {:.2}, errors {:.2}, cpu {:.2}, memory {}B)",
            metrics.sampling_rate, metrics.traces_per_second, metrics.error_rate,
            metrics.cpu_usage, metrics.memory_bytes);
        true
    }
}

/// Feedback controller over the collector's sampling rate.
///
/// The sampler writes the same [`SamplingRate`] the collector's gate reads, so
/// adjustments take effect on the next `start_trace`. Adjustments happen on
/// explicit [`adjust_sampling_rate`](Self::adjust_sampling_rate) calls or on a
/// tokio tick after [`start`](Self::start).
pub struct AdaptiveSampler {
    inner: Arc<AdaptiveInner>,
    task: Mutex<Option<PeriodicTask>>,
}

impl AdaptiveSampler {
    pub fn new(collector: Arc<Collector>, config: AdaptiveSamplingConfig) -> Self {
        Self::with_probe(collector, config, Arc::new(SysinfoProbe::new()))
    }

    pub fn with_probe(collector: Arc<Collector>, config: AdaptiveSamplingConfig, probe: Arc<dyn ResourceProbe>) -> Self {
        let rate = collector.sampling_rate();
        if let Some(initial_rate) = config.initial_rate {
            rate.set(initial_rate);
        }
        let metrics = SamplingMetrics{
            traces_per_second: 0.0,
            avg_trace_size_bytes: 0.0,
            memory_bytes: 0,
            cpu_usage: DEFAULT_CPU_USAGE,
            error_rate: 0.0,
            sampling_rate: rate.get(),
            timestamp: collector.now(),
        };
        let state = ControllerState{
            last_adjustment_nanos: None,
            last_cpu_sample: None,
            metrics,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            memory_readings: None,
        };
        Self{
            inner: Arc::new(AdaptiveInner{ config, collector, rate, probe, state: Mutex::new(state) }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AdaptiveSamplingConfig {
        &self.inner.config
    }

    pub fn current_rate(&self) -> f64 {
        self.inner.rate.get()
    }

    /// Last computed snapshot.
    pub fn metrics(&self) -> SamplingMetrics {
        self.inner.lock_state().metrics
    }

    /// Snapshots taken at each adjustment, oldest first, at most `HISTORY_LIMIT`.
    pub fn history(&self) -> Vec<SamplingMetrics> {
        self.inner.lock_state().history.iter().copied().collect()
    }

    /// Use the latest reading of a [`MemoryMonitor`](crate::MemoryMonitor)
    /// instead of querying the probe.
    pub fn attach_memory_readings(&self, readings: MemoryReadings) {
        self.inner.lock_state().memory_readings = Some(readings);
    }

    /// Recomputes the rate unless the previous adjustment is younger than
    /// `adjustment_interval`. Returns whether an adjustment happened.
    pub fn adjust_sampling_rate(&self) -> bool {
        if !self.inner.config.enabled { return false }
        self.inner.adjust(true)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<PeriodicTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns the adjustment tick on the current tokio runtime. No-op when
    /// disabled or already running.
    pub fn start(&self) -> Result<(), SamplerError> {
        if !self.inner.config.enabled { return Ok(()) }
        let mut task = self.lock_task();
        if task.is_some() { return Ok(()) }
        *task = Some(spawn_periodic(
            Arc::downgrade(&self.inner),
            self.inner.config.adjustment_interval,
            |inner: &AdaptiveInner| { inner.adjust(false); },
        )?);
        #[cfg(feature = "log")]
        log::debug!("adaptive sampler started, interval {:?}", self.inner.config.adjustment_interval);
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(task) = self.lock_task().take() {
            task.stop();
            #[cfg(feature = "log")]
            log::debug!("adaptive sampler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_task().is_some()
    }
}

impl Sampler for AdaptiveSampler {
    fn should_sample(&self) -> bool {
        if !self.inner.config.enabled { return true }
        let now = self.inner.collector.now();
        let mut state = self.inner.lock_state();
        self.inner.refresh(&mut state, now);
        drop(state);
        fastrand::f64() < self.inner.rate.get()
    }
}

impl Drop for AdaptiveSampler {
    fn drop(&mut self) {
        self.stop();
    }
}
