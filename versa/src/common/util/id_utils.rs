use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Monotonically increasing id source. Values start at 1 and are never handed out twice.
#[derive(Debug)]
pub struct Sequence {
    next: AtomicU64,
}

impl Sequence {
    pub fn new() -> Self {
        Sequence {
            next: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn next_value(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The value the next call to `next_value` returns.
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Sequence::new()
    }
}

#[inline]
pub fn unique_id() -> String {
    Uuid::new_v4().to_string()
}
