//! Time sources for the harness polling loops.
//!
//! Every wait in the harness is a bounded sleep followed by a recheck. The
//! loops read time and sleep through [`Clock`] so that tests can run them on a
//! [`VirtualClock`] that advances instantly.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by `tokio::time`.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manually driven clock. Sleeping advances the clock by the requested
/// duration and returns immediately.
///
/// Clones share the same time.
///
/// # Examples
///
/// ```rust
/// use cabin_core::clock::{Clock, VirtualClock};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let clock = VirtualClock::new();
/// clock.sleep(Duration::from_millis(250)).await;
/// assert_eq!(clock.now(), Duration::from_millis(250));
/// # });
/// ```
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now: Arc<Mutex<Duration>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(now: Duration) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock() += duration;
    }

    /// Moves the clock to `now`. Virtual time never goes backwards, so earlier
    /// instants are ignored.
    pub fn set(&self, now: Duration) {
        let mut current = self.now.lock();
        if now > *current {
            *current = now;
        }
    }
}

#[async_trait]
impl Clock for VirtualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_virtual_clock_shared_between_clones() {
        let clock = VirtualClock::new();
        let other = clock.clone();

        clock.sleep(Duration::from_millis(100)).await;
        other.advance(Duration::from_millis(50));

        assert_eq!(clock.now(), Duration::from_millis(150));
    }

    #[test]
    fn test_virtual_clock_never_goes_back() {
        let clock = VirtualClock::starting_at(Duration::from_secs(10));
        clock.set(Duration::from_secs(3));
        assert_eq!(clock.now(), Duration::from_secs(10));
        clock.set(Duration::from_secs(12));
        assert_eq!(clock.now(), Duration::from_secs(12));
    }

    #[tokio::test]
    async fn test_system_clock_advances() {
        let clock = SystemClock::new();
        let before = clock.now();
        clock.sleep(Duration::from_millis(5)).await;
        assert!(clock.now() >= before + Duration::from_millis(5));
    }
}
