//! Clock abstraction for lease and retry timing.
//!
//! Every visibility computation in the broker compares a stored timestamp
//! against "now". Injecting the time source keeps those comparisons
//! deterministic under test: production uses [`RealClock`], tests use
//! [`TestClock`] and advance virtual time instead of sleeping.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};

/// Monotonic-plus-wall-clock time source.
///
/// `now` serves duration measurements, `now_system` serves the timestamps
/// persisted on messages and deliveries, and `sleep` lets polling loops be
/// driven by virtual time in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant for duration measurements.
    fn now(&self) -> Instant;

    /// Current system time for persisted timestamps.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    ///
    /// Maps to `tokio::time::sleep` in production; test clocks advance
    /// immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Current system time as a UTC timestamp.
    fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now_system())
    }
}

/// Production clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Controllable clock for deterministic tests.
///
/// Monotonic and system time advance together through [`TestClock::advance`],
/// so "wait six seconds for the lease to expire" becomes a single method
/// call instead of a real sleep.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Nanoseconds of virtual time elapsed since construction.
    elapsed_ns: Arc<AtomicU64>,
    /// System time at construction, as nanoseconds since `UNIX_EPOCH`.
    origin_ns: u64,
    /// Base instant for monotonic calculations.
    base_instant: Instant,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock starting at a specific system time.
    pub fn with_start_time(start: SystemTime) -> Self {
        let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            origin_ns: u64::try_from(since_epoch.as_nanos().min(u128::from(u64::MAX)))
                .unwrap_or(0),
            base_instant: Instant::now(),
        }
    }

    /// Advances virtual time by the specified duration.
    pub fn advance(&self, duration: Duration) {
        let duration_ns =
            u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0);
        self.elapsed_ns.fetch_add(duration_ns, Ordering::AcqRel);
    }

    /// Virtual time elapsed since clock creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.origin_ns) + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        // Sleeping in tests just advances the clock; yield so other tasks
        // observe the new time.
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_both_clocks() {
        let clock = TestClock::new();
        let start_instant = clock.now();
        let start_system = clock.now_system();

        clock.advance(Duration::from_secs(42));

        assert_eq!(clock.now().duration_since(start_instant), Duration::from_secs(42));
        assert_eq!(
            clock.now_system().duration_since(start_system).unwrap(),
            Duration::from_secs(42)
        );
    }

    #[test]
    fn starts_at_requested_time() {
        let origin = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let clock = TestClock::with_start_time(origin);
        assert_eq!(clock.now_system(), origin);
    }

    #[test]
    fn utc_view_tracks_advances() {
        let origin = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let clock = TestClock::with_start_time(origin);
        let before = clock.now_utc();

        clock.advance(Duration::from_secs(30));

        assert_eq!(clock.now_utc() - before, chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn sleep_advances_instead_of_waiting() {
        let clock = TestClock::new();
        let wall_start = Instant::now();

        clock.sleep(Duration::from_secs(3600)).await;

        assert_eq!(clock.elapsed(), Duration::from_secs(3600));
        assert!(wall_start.elapsed() < Duration::from_secs(1));
    }
}
