mod adaptive;
pub use adaptive::*;

mod memory;
pub use memory::*;

mod probes;
pub use probes::*;

mod ticker;
pub use ticker::SamplerError;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub trait Sampler: Send + Sync + 'static {
    fn should_sample(&self) -> bool;
}

/// Shared sampling probability.
///
/// The collector's gate reads it on every `start_trace`; the adaptive sampler
/// writes it. Clones observe the same value.
#[derive(Debug, Clone)]
pub struct SamplingRate(Arc<AtomicU64>);

impl SamplingRate {
    pub fn new(rate: f64) -> Self {
        let this = Self(Arc::new(AtomicU64::new(0)));
        this.set(rate);
        this
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Stored as given when inside 0..=1, clamped otherwise; NaN reads as 0.
    pub fn set(&self, rate: f64) {
        let rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self.0.store(rate.to_bits(), Ordering::Relaxed);
    }
}

impl Sampler for SamplingRate {
    fn should_sample(&self) -> bool {
        fastrand::f64() < self.get()
    }
}
