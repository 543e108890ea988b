use crate::Timestamp;

const REFILL_PERIOD_NANOS: u64 = 1_000_000_000;

/// Per-second cap on accepted trace starts. The bucket is refilled to
/// capacity in one step once a full second has passed since the last refill.
pub(crate) struct TokenBucket {
    capacity: u32,
    tokens: u32,
    last_refill_nanos: u64,
}

impl TokenBucket {
    pub fn new(capacity: u32, now: Timestamp) -> Self {
        Self{ capacity, tokens: capacity, last_refill_nanos: now.nanos }
    }

    pub fn try_acquire(&mut self, now: Timestamp) -> bool {
        if now.nanos.saturating_sub(self.last_refill_nanos) >= REFILL_PERIOD_NANOS {
            self.tokens = self.capacity;
            self.last_refill_nanos = now.nanos;
        }
        if self.tokens == 0 {
            return false
        }
        self.tokens -= 1;
        true
    }
}
