//! Custom clock source for cache expiration (spec.md §4.8's `ticker(t)`).

use std::sync::OnceLock;
use std::time::Instant;

/// A monotonic nanosecond clock, independent of [`crate::clock::Clock`]
/// (which the rate limiter uses) since a cache ticker has no sleep half.
pub trait Ticker: Send + Sync {
    fn read_nanos(&self) -> u64;
}

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Backed by [`Instant`], so readings are only meaningful relative to each
/// other within one process run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTicker;

impl Ticker for SystemTicker {
    fn read_nanos(&self) -> u64 {
        EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
    }
}
