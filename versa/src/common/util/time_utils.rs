use std::time::{Duration, Instant};

/// Returns true when `timeout` is set and more than `timeout` has elapsed since `started`.
#[inline]
pub fn deadline_expired(started: Instant, timeout: Option<Duration>) -> bool {
    match timeout {
        Some(limit) => started.elapsed() > limit,
        None => false,
    }
}
