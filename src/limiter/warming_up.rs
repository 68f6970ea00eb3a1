//! The cold-start warm-up mode.
//!
//! Serves at the cold rate (`stable_interval * cold_factor`) right after
//! start-up or a long idle period, then ramps linearly down to the stable
//! rate as stored permits above `threshold_permits` are spent. The cost
//! curve `permits_to_time(x) = stable_interval + x * slope` is a line from
//! `(0, stable_interval)` to `(max_permits - threshold_permits, cold_interval)`;
//! spending `take` permits above the threshold costs the trapezoidal area
//! under that line (spec.md §4.3).

use super::Policy;

/// The policy backing [`super::RateLimiter::smooth_warming_up`].
#[derive(Debug)]
pub struct WarmingUpPolicy {
    pub(crate) warmup_period_micros: f64,
    pub(crate) cold_factor: f64,
    pub(crate) threshold_permits: f64,
    pub(crate) slope: f64,
}

impl WarmingUpPolicy {
    fn permits_to_time(&self, stable_interval_micros: f64, x: f64) -> f64 {
        stable_interval_micros + x * self.slope
    }
}

impl Policy for WarmingUpPolicy {
    fn cool_down_interval_micros(&self, _stable_interval_micros: f64, max_permits: f64) -> f64 {
        // Idle time refills the bucket from empty to full in exactly
        // warmup_period_micros, restoring the cold state.
        self.warmup_period_micros / max_permits
    }

    fn stored_permits_to_wait_time(&self, stable_interval_micros: f64, stored: f64, take: f64) -> i64 {
        let above_threshold = (stored - self.threshold_permits).max(0.0);
        let take_above = above_threshold.min(take);

        let area_above = take_above
            * (self.permits_to_time(stable_interval_micros, above_threshold)
                + self.permits_to_time(stable_interval_micros, above_threshold - take_above))
            / 2.0;
        let area_below = (take - take_above) * stable_interval_micros;

        area_above.floor() as i64 + area_below.floor() as i64
    }

    fn on_rate_change(&mut self, stable_interval_micros: f64) -> f64 {
        let cold_interval_micros = stable_interval_micros * self.cold_factor;
        let threshold_permits = 0.5 * self.warmup_period_micros / stable_interval_micros;
        let max_permits =
            threshold_permits + 2.0 * self.warmup_period_micros / (stable_interval_micros + cold_interval_micros);
        let slope = (cold_interval_micros - stable_interval_micros) / (max_permits - threshold_permits);

        self.threshold_permits = threshold_permits;
        self.slope = slope;
        max_permits
    }

    fn rescale_stored_permits(&self, old_stored: f64, old_max_permits: f64, new_max_permits: f64) -> f64 {
        if old_max_permits == f64::INFINITY {
            0.0
        } else if old_max_permits == 0.0 {
            // Cold start: a fresh warm-up limiter begins full — cold — so
            // early callers experience the slowdown (spec.md §4.3).
            new_max_permits
        } else {
            old_stored * new_max_permits / old_max_permits
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::RateLimiter;
    use crate::clock::{Clock, FakeClock, FakeSleeper};
    use std::sync::Arc;
    use std::time::Duration;

    fn limiter(rate: f64, warmup_secs: u64, cold_factor: f64) -> (RateLimiter, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new());
        let sleeper = Arc::new(FakeSleeper::tied_to(clock.clone()));
        let limiter = RateLimiter::smooth_warming_up_with_clock(
            rate,
            Duration::from_secs(warmup_secs),
            cold_factor,
            clock.clone(),
            sleeper,
        )
        .unwrap();
        (limiter, clock)
    }

    /// rate=10/s, coldFactor=3, warmup=2s: thresholdPermits=10, maxPermits=20,
    /// slope=20_000 (see DESIGN.md for why this crate derives maxPermits=20
    /// rather than the worked example's 15 — the `2 ×` term in the
    /// maxPermits formula is load-bearing for the "integral over
    /// [threshold, max] equals warmupPeriodMicros" invariant, and the
    /// worked example in spec.md §8 does not satisfy that invariant).
    /// Acquiring 5 permits from full costs the trapezoid area from
    /// stored=20 down to stored=15: 5 × (250_000 + 200_000) / 2. That cost is
    /// charged forward onto the next caller (the first acquire itself is
    /// always free), so we prime with it and assert on the following call.
    #[test]
    fn trapezoid_scenario() {
        let (limiter, _clock) = limiter(10.0, 2, 3.0);
        let _ = limiter.acquire(5).unwrap();
        let wait = limiter.acquire(1).unwrap();
        assert_eq!(wait.as_micros(), 1_250_000);
    }

    /// The defining invariant (spec.md §3): draining exactly
    /// `maxPermits - thresholdPermits` permits from a full bucket costs
    /// exactly `warmupPeriodMicros`, because `permits_to_time` integrates to
    /// that by construction.
    #[test]
    fn integral_over_threshold_to_max_equals_warmup_period() {
        let (limiter, _clock) = limiter(10.0, 2, 3.0);
        // thresholdPermits = 10, maxPermits = 20 for this configuration. As
        // above, the cost of draining from full is charged to the caller
        // after the one that reserved it.
        let _ = limiter.acquire(10).unwrap();
        let wait = limiter.acquire(1).unwrap();
        assert_eq!(wait.as_micros(), 2_000_000);
    }

    /// spec.md §8.3: draining maxPermits from full takes warmupPeriodMicros,
    /// within one stableInterval.
    #[test]
    fn drains_full_bucket_in_warmup_period() {
        let (limiter, clock) = limiter(10.0, 2, 3.0);
        let (_, max_permits) = limiter.permit_snapshot();
        let whole = max_permits.floor() as u32;
        let mut total_micros: i64 = 0;
        for _ in 0..whole {
            total_micros += limiter.acquire(1).unwrap().as_micros() as i64;
        }
        // Any leftover fractional permit.
        let (stored, _) = limiter.permit_snapshot();
        if stored > 0.0 {
            total_micros += limiter.acquire(1).unwrap().as_micros() as i64;
        }
        let _ = clock; // time is simulated via FakeSleeper advancing the clock
        assert!((total_micros - 2_000_000).abs() <= 100_000, "total={total_micros}");
    }

    /// spec.md §4.3: COLD (stored >= threshold) vs WARM (stored < threshold)
    /// — spending past the threshold should cost strictly less per permit
    /// than spending above it.
    #[test]
    fn cold_permits_cost_more_than_warm_permits() {
        let (limiter, _clock) = limiter(10.0, 2, 3.0);
        // The very first acquire is always free (no debt has accrued yet);
        // its cost is charged to the *next* caller instead. That next
        // caller therefore pays for a permit taken from the coldest part of
        // the curve (stored close to maxPermits).
        let _ = limiter.acquire(1).unwrap();
        let cold_wait = limiter.acquire(1).unwrap();

        // Spend down past the threshold so the bucket is in the WARM regime.
        for _ in 0..15 {
            let _ = limiter.acquire(1).unwrap();
        }
        let warm_wait = limiter.acquire(1).unwrap();
        assert!(cold_wait > warm_wait, "cold={cold_wait:?} warm={warm_wait:?}");
    }

    #[test]
    fn invariants_hold_across_schedule() {
        let (limiter, clock) = limiter(10.0, 2, 3.0);
        let mut last_moment = i64::MIN;
        for step in 0..200 {
            if step % 4 == 0 {
                clock.advance(11_000);
            }
            let _ = limiter.acquire(1).unwrap();
            let (stored, max_permits) = limiter.permit_snapshot();
            assert!((0.0..=max_permits).contains(&stored));
            let now = Clock::read_micros(&*clock);
            assert!(now >= last_moment);
            last_moment = now;
        }
    }
}
