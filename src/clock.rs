//! The host clock/sleep facility.
//!
//! Spec-wise this is an external collaborator (see module docs on
//! [`crate::limiter`]): the rate limiter only ever asks it for "now" in
//! microseconds and asks it to block for a span of microseconds. Both are
//! injected so tests can run a warm-up or burst scenario without actually
//! sleeping for seconds at a time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic, microsecond-resolution clock.
pub trait Clock: Send + Sync {
    /// Read the current time, in microseconds, from some fixed epoch.
    ///
    /// Must be monotonically non-decreasing across calls on a single clock
    /// instance; the epoch itself is unspecified and only differences
    /// between reads are meaningful.
    fn read_micros(&self) -> i64;
}

/// An uninterruptible sleep facility.
pub trait Sleeper: Send + Sync {
    /// Block the calling thread for approximately `micros` microseconds.
    ///
    /// A no-op for `micros <= 0`. Real sleeps in this crate are always
    /// uninterruptible: a cancelled/interrupted thread does not wake early.
    fn sleep_micros_uninterruptibly(&self, micros: i64);
}

/// The default [`Clock`], backed by [`std::time::Instant`].
///
/// `Instant` has no fixed epoch of its own, so the first read establishes
/// this clock's zero point.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn read_micros(&self) -> i64 {
        self.origin.elapsed().as_micros() as i64
    }
}

/// The default [`Sleeper`], backed by [`std::thread::sleep`].
///
/// `std::thread::sleep` is already uninterruptible on every platform Rust
/// targets (unlike Java's `Thread.sleep`, it has no checked interrupt
/// state to preserve), so this is a thin, honest wrapper.
#[derive(Debug, Default)]
pub struct SystemSleeper;

impl Sleeper for SystemSleeper {
    fn sleep_micros_uninterruptibly(&self, micros: i64) {
        if micros > 0 {
            std::thread::sleep(Duration::from_micros(micros as u64));
        }
    }
}

/// A fake clock for tests: advances only when told to.
///
/// Grounded in the same "inject time" shape `river`'s own tests use real
/// `tokio::time::sleep_until` deadlines to pace rate-limiter scenarios; here
/// we go one step further and make time a plain, directly-steppable counter
/// so warm-up/burst scenarios in `tests/` are fast and deterministic.
#[derive(Debug, Default)]
pub struct FakeClock {
    now: AtomicI64,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            now: AtomicI64::new(0),
        }
    }

    /// Move the clock forward by `micros` (must be >= 0).
    pub fn advance(&self, micros: i64) {
        self.now.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn read_micros(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Pairs with [`FakeClock`]: records the requested sleep instead of blocking,
/// and advances the paired clock by the same amount so that immediately
/// re-reading the clock reflects time "having passed".
#[derive(Debug, Clone)]
pub struct FakeSleeper {
    clock: std::sync::Arc<FakeClock>,
}

impl FakeSleeper {
    pub fn tied_to(clock: std::sync::Arc<FakeClock>) -> Self {
        Self { clock }
    }
}

impl Sleeper for FakeSleeper {
    fn sleep_micros_uninterruptibly(&self, micros: i64) {
        if micros > 0 {
            self.clock.advance(micros);
        }
    }
}
