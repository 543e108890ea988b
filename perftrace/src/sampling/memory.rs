use super::ticker::{spawn_periodic, PeriodicTask, SamplerError};
use super::ResourceProbe;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const MEMORY_READINGS_LIMIT: usize = 60;

/// Most recent memory readings in bytes, oldest first. Clones share storage.
#[derive(Clone, Default)]
pub struct MemoryReadings(Arc<Mutex<VecDeque<u64>>>);

impl MemoryReadings {
    fn lock(&self) -> MutexGuard<'_, VecDeque<u64>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn latest(&self) -> Option<u64> {
        self.lock().back().copied()
    }

    pub fn all(&self) -> Vec<u64> {
        self.lock().iter().copied().collect()
    }

    fn push(&self, bytes: u64) {
        let mut readings = self.lock();
        readings.push_back(bytes);
        while readings.len() > MEMORY_READINGS_LIMIT {
            readings.pop_front();
        }
    }
}

struct MonitorInner {
    probe: Arc<dyn ResourceProbe>,
    readings: MemoryReadings,
}

impl MonitorInner {
    fn poll(&self) -> Option<u64> {
        let bytes = self.probe.memory_bytes();
        match bytes {
            Some(bytes) => self.readings.push(bytes),
            None => {
                #[cfg(feature = "log")]
                log::debug!("memory reading unavailable");
            }
        }
        bytes
    }
}

/// Optional periodic memory poll, started and stopped independently of the
/// adaptive sampler. Hand its [`MemoryReadings`] to
/// [`AdaptiveSampler::attach_memory_readings`](crate::AdaptiveSampler::attach_memory_readings)
/// to let the sampler use the polled values instead of reading the probe itself.
pub struct MemoryMonitor {
    inner: Arc<MonitorInner>,
    task: Mutex<Option<PeriodicTask>>,
}

impl MemoryMonitor {
    pub fn new(probe: Arc<dyn ResourceProbe>) -> Self {
        Self{
            inner: Arc::new(MonitorInner{ probe, readings: MemoryReadings::default() }),
            task: Mutex::new(None),
        }
    }

    pub fn readings(&self) -> MemoryReadings {
        self.inner.readings.clone()
    }

    pub fn poll_once(&self) -> Option<u64> {
        self.inner.poll()
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<PeriodicTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts polling every `interval`. Calling it while running is a no-op.
    pub fn start(&self, interval: Duration) -> Result<(), SamplerError> {
        let mut task = self.lock_task();
        if task.is_some() { return Ok(()) }
        *task = Some(spawn_periodic(Arc::downgrade(&self.inner), interval, |inner: &MonitorInner| {
            inner.poll();
        })?);
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(task) = self.lock_task().take() {
            task.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_task().is_some()
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestProbe;

    #[test]
    fn keeps_a_bounded_window_of_readings() {
        let probe = TestProbe::default();
        let monitor = MemoryMonitor::new(Arc::new(probe.clone()));
        for bytes in 0..(MEMORY_READINGS_LIMIT as u64 + 5) {
            probe.set_memory_bytes(bytes);
            monitor.poll_once();
        }
        let readings = monitor.readings().all();
        assert_eq!(readings.len(), MEMORY_READINGS_LIMIT);
        assert_eq!(readings[0], 5);
        assert_eq!(monitor.readings().latest(), Some(MEMORY_READINGS_LIMIT as u64 + 4));
    }

    #[test]
    fn failed_reading_is_not_recorded() {
        let probe = TestProbe::default();
        probe.set_failing(true);
        let monitor = MemoryMonitor::new(Arc::new(probe));
        assert_eq!(monitor.poll_once(), None);
        assert_eq!(monitor.readings().latest(), None);
    }

    #[test]
    fn start_outside_runtime_fails_softly() {
        let monitor = MemoryMonitor::new(Arc::new(TestProbe::default()));
        assert_eq!(monitor.start(Duration::from_secs(1)), Err(SamplerError::NoRuntime));
        assert!(!monitor.is_running());
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_stopped() {
        let probe = TestProbe::default();
        probe.set_memory_bytes(1024);
        let monitor = MemoryMonitor::new(Arc::new(probe));

        monitor.start(Duration::from_secs(5)).unwrap();
        monitor.start(Duration::from_secs(5)).unwrap();
        tokio::time::sleep(Duration::from_millis(15_500)).await;
        assert_eq!(monitor.readings().all().len(), 3);

        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(monitor.readings().all().len(), 3);
    }
}
