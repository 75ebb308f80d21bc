//! Delays and deadlines.
//!
//! Every fixed wait in the connection and flash sequence goes through the
//! [`Delay`] capability so the sequences can be replayed without real time.

use std::thread;
use std::time::{Duration, Instant};

/// Something that can block the current flow for a while.
pub trait Delay: Send + Sync {
    /// Block for `duration`.
    fn sleep(&self, duration: Duration);
}

/// [`Delay`] backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// A point in time after which an operation must give up.
///
/// Handed to operations that poll a device; they stop their I/O once
/// [`Deadline::expired`] turns true.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    /// Deadline `limit` from now.
    pub fn after(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    /// The total bound this deadline was created with.
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.start.elapsed())
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_deadline_is_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_long_deadline_is_open() {
        let deadline = Deadline::after(Duration::from_secs(15));
        assert!(!deadline.expired());
        assert!(deadline.remaining() <= Duration::from_secs(15));
        assert_eq!(deadline.limit(), Duration::from_secs(15));
    }
}
