use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessesToUpdate, System};

/// Source of process resource readings. `None` means the reading is not
/// available on this platform or failed; callers fall back to defaults.
pub trait ResourceProbe: Send + Sync + 'static {
    /// resident memory of the process in bytes
    fn memory_bytes(&self) -> Option<u64>;
    /// CPU time (user + system) consumed by the process so far
    fn cpu_time(&self) -> Option<Duration>;
}

/// Reads this process through `sysinfo`. Readings are `None` on platforms
/// `sysinfo` does not support or when the process cannot be found.
pub struct SysinfoProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid();
        #[cfg(feature = "log")]
        if let Err(err) = &pid {
            log::debug!("process readings unavailable: {err}");
        }
        Self{ pid: pid.ok(), system: Mutex::new(System::new()) }
    }

    /// Refreshes this process only and reads from it.
    fn read<T>(&self, refresh: ProcessRefreshKind, f: impl FnOnce(&Process) -> T) -> Option<T> {
        let pid = self.pid?;
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, refresh);
        let process = system.process(pid);
        #[cfg(feature = "log")]
        if process.is_none() {
            log::debug!("process {pid} not found by sysinfo");
        }
        process.map(f)
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self { Self::new() }
}

impl ResourceProbe for SysinfoProbe {
    fn memory_bytes(&self) -> Option<u64> {
        self.read(ProcessRefreshKind::nothing().with_memory(), Process::memory)
    }

    fn cpu_time(&self) -> Option<Duration> {
        // accumulated across all threads, in milliseconds
        self.read(ProcessRefreshKind::nothing().with_cpu(), |process| {
            Duration::from_millis(process.accumulated_cpu_time())
        })
    }
}

/// Settable readings for tests. Clones share the same values.
#[derive(Clone, Default)]
pub struct TestProbe {
    memory: Arc<AtomicU64>,
    cpu_nanos: Arc<AtomicU64>,
    failing: Arc<AtomicU64>,
}

impl TestProbe {
    pub fn set_memory_bytes(&self, bytes: u64){
        self.memory.store(bytes, Ordering::SeqCst);
    }
    pub fn add_cpu_time(&self, by: Duration){
        self.cpu_nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
    /// makes every reading return `None`
    pub fn set_failing(&self, failing: bool){
        self.failing.store(failing as u64, Ordering::SeqCst);
    }
    fn is_failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst) != 0
    }
}

impl ResourceProbe for TestProbe {
    fn memory_bytes(&self) -> Option<u64> {
        if self.is_failing() { return None }
        Some(self.memory.load(Ordering::SeqCst))
    }

    fn cpu_time(&self) -> Option<Duration> {
        if self.is_failing() { return None }
        Some(Duration::from_nanos(self.cpu_nanos.load(Ordering::SeqCst)))
    }
}
