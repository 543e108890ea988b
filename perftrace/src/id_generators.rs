//! Id sources for the collector. Every trace draws two ids up front: its own
//! and the one reserved for its virtual root span.

use crate::{SpanId, TraceId};
use std::num::{NonZeroU128, NonZeroU64};
use std::sync::atomic::{AtomicU64, Ordering};

pub trait IdGenerator: Send + Sync + 'static {
    fn trace_id(&self) -> TraceId;
    fn span_id(&self) -> SpanId;

    /// The id of a new trace together with its root span id.
    fn trace_ids(&self) -> (TraceId, SpanId) {
        (self.trace_id(), self.span_id())
    }
}

/// Random ids from fastrand's thread-local generator.
pub struct FastrandIdGenerator;

impl IdGenerator for FastrandIdGenerator {
    // NOTE the ranges exclude zero, the fallbacks are unreachable
    fn trace_id(&self) -> TraceId {
        TraceId(NonZeroU128::new(fastrand::u128(1..)).unwrap_or(NonZeroU128::MIN))
    }

    fn span_id(&self) -> SpanId {
        SpanId(NonZeroU64::new(fastrand::u64(1..)).unwrap_or(NonZeroU64::MIN))
    }
}

/// Counts 1, 2, 3, ... over trace and span ids alike, so no two ids handed
/// out by one generator share a value and a trace's root span id is always
/// its trace id plus one.
#[derive(Default)]
pub struct TestIdGenerator {
    issued: AtomicU64,
}

impl TestIdGenerator {
    fn next(&self) -> NonZeroU64 {
        NonZeroU64::MIN.saturating_add(self.issued.fetch_add(1, Ordering::SeqCst))
    }
}

impl IdGenerator for TestIdGenerator {
    fn trace_id(&self) -> TraceId {
        TraceId(self.next().into())
    }

    fn span_id(&self) -> SpanId {
        SpanId(self.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_across_kinds() {
        let ids = TestIdGenerator::default();
        let (trace, root) = ids.trace_ids();
        assert_eq!(trace.0.get(), 1);
        assert_eq!(root.0.get(), 2);
        assert_eq!(ids.span_id().0.get(), 3);
        assert_eq!(ids.trace_id().0.get(), 4);
    }

    #[test]
    fn random_ids_differ() {
        let (trace, root) = FastrandIdGenerator.trace_ids();
        assert_ne!(trace, FastrandIdGenerator.trace_id());
        assert_ne!(root, FastrandIdGenerator.span_id());
    }
}
