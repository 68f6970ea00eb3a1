//! The burst-tolerant mode.
//!
//! Stored permits are free to spend — idle capacity can be spent in a
//! burst with zero added wait — and idle time refills the bucket at exactly
//! the stable rate.

use super::Policy;

/// `cool_down_interval_micros() == stable_interval_micros`,
/// `stored_permits_to_wait_time() == 0`: the policy backing
/// [`super::RateLimiter::smooth_bursty`].
#[derive(Debug)]
pub struct BurstyPolicy {
    pub(crate) max_burst_seconds: f64,
}

impl Policy for BurstyPolicy {
    fn cool_down_interval_micros(&self, stable_interval_micros: f64, _max_permits: f64) -> f64 {
        stable_interval_micros
    }

    fn stored_permits_to_wait_time(&self, _stable_interval_micros: f64, _stored: f64, _take: f64) -> i64 {
        0
    }

    fn on_rate_change(&mut self, stable_interval_micros: f64) -> f64 {
        self.max_burst_seconds * (1_000_000.0 / stable_interval_micros)
    }

    fn rescale_stored_permits(&self, old_stored: f64, old_max_permits: f64, new_max_permits: f64) -> f64 {
        if old_max_permits == f64::INFINITY {
            new_max_permits
        } else if old_max_permits == 0.0 {
            // Cold start: a fresh bursty limiter has not pre-charged a burst.
            0.0
        } else {
            old_stored * new_max_permits / old_max_permits
        }
    }
}
