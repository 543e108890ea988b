use serde::{Deserialize, Serialize};
use std::sync::{atomic, Arc, OnceLock};
use std::time::{Duration, Instant, UNIX_EPOCH};

/// A point in time read from two clocks at once.
///
/// `nanos` is monotonic and only meaningful as a difference between two
/// timestamps of the same process. `wall_ms` is unix milliseconds and only
/// used for range queries, age sweeps and display. Neither is ever computed
/// from the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timestamp {
    pub nanos: u64,
    pub wall_ms: u64,
}

impl Timestamp {
    /// Monotonic milliseconds elapsed since `earlier`, saturating at zero.
    pub fn millis_since(&self, earlier: &Timestamp) -> f64 {
        self.nanos.saturating_sub(earlier.nanos) as f64 / 1e6
    }
}

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;
}

pub struct StdClock;

fn monotonic_anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

impl Clock for StdClock {
    fn now(&self) -> Timestamp {
        let nanos = monotonic_anchor().elapsed().as_nanos() as u64;
        // NOTE a wall clock before 1970 reads as 0 rather than failing
        let wall_ms = std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp{ nanos, wall_ms }
    }
}

/// Manually driven clock. Clones share the same time.
#[derive(Clone)]
pub struct TestClock {
    nanos: Arc<atomic::AtomicU64>,
    wall_ms: Arc<atomic::AtomicU64>,
}

impl Default for TestClock {
    fn default() -> Self {
        Self::starting_at_wall_ms(1_700_000_000_000)
    }
}

impl TestClock {
    pub fn starting_at_wall_ms(wall_ms: u64) -> Self {
        Self{
            nanos: Arc::new(atomic::AtomicU64::new(0)),
            wall_ms: Arc::new(atomic::AtomicU64::new(wall_ms)),
        }
    }

    /// Moves both clocks forward.
    pub fn advance(&self, by: Duration){
        self.nanos.fetch_add(by.as_nanos() as u64, atomic::Ordering::SeqCst);
        self.wall_ms.fetch_add(by.as_millis() as u64, atomic::Ordering::SeqCst);
    }

    pub fn advance_millis(&self, ms: u64){
        self.advance(Duration::from_millis(ms));
    }

    /// Jumps only the wall clock, like an NTP correction would.
    pub fn set_wall_ms(&self, wall_ms: u64){
        self.wall_ms.store(wall_ms, atomic::Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Timestamp {
        Timestamp{
            nanos: self.nanos.load(atomic::Ordering::SeqCst),
            wall_ms: self.wall_ms.load(atomic::Ordering::SeqCst),
        }
    }
}
