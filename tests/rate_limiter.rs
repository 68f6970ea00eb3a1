//! Black-box coverage of `tryAcquire` and `set_rate`, properties not already
//! pinned down by the in-module unit tests next to the policies.

use std::sync::Arc;
use std::time::Duration;

use ratebus::clock::{Clock, FakeClock, FakeSleeper};
use ratebus::limiter::RateLimiter;

fn bursty(rate: f64, max_burst_seconds: f64) -> (RateLimiter, Arc<FakeClock>) {
    let clock = Arc::new(FakeClock::new());
    let sleeper = Arc::new(FakeSleeper::tied_to(clock.clone()));
    let limiter = RateLimiter::smooth_bursty_with_clock(rate, max_burst_seconds, clock.clone(), sleeper).unwrap();
    (limiter, clock)
}

#[test]
fn try_acquire_zero_timeout_fails_on_a_cold_empty_limiter() {
    let (limiter, _clock) = bursty(1.0, 1.0);
    // A bursty limiter starts with zero stored permits (nothing pre-charged);
    // the very first caller still pays nothing itself — its cost is charged
    // forward onto whoever asks next.
    assert!(limiter.try_acquire(1, Duration::ZERO).unwrap());
    // ...so the second caller inherits that debt, and a zero timeout can't
    // cover it.
    assert!(!limiter.try_acquire(1, Duration::ZERO).unwrap());
}

#[test]
fn try_acquire_long_timeout_succeeds_and_matches_acquire_wait() {
    // Two identically-configured limiters, driven through the same first
    // call, so the second call's reservation is deterministic and
    // comparable between the `acquire` and `tryAcquire` code paths.
    let (limiter, _clock) = bursty(1.0, 1.0);
    limiter.try_acquire(1, Duration::ZERO).unwrap(); // first caller, charged forward

    let (limiter2, clock2) = bursty(1.0, 1.0);
    limiter2.try_acquire(1, Duration::ZERO).unwrap();

    let wait = limiter.acquire(1).unwrap();

    assert!(limiter2.try_acquire(1, Duration::from_secs(10)).unwrap());
    assert_eq!(clock2.read_micros(), wait.as_micros() as i64);
}

#[test]
fn try_acquire_does_not_mutate_state_when_it_fails() {
    let (limiter, _clock) = bursty(1.0, 1.0);
    limiter.try_acquire(1, Duration::ZERO).unwrap();

    let before = limiter.permit_snapshot();
    assert!(!limiter.try_acquire(1, Duration::ZERO).unwrap());
    let after = limiter.permit_snapshot();
    assert_eq!(before, after, "a failed tryAcquire must not reserve anything");
}

#[test]
fn set_rate_resyncs_before_changing_the_cooldown_interval() {
    let (limiter, clock) = bursty(10.0, 1.0);
    clock.advance(1_000_000); // fully refill the burst capacity at the old rate
    limiter.set_rate(5.0).unwrap();
    assert_eq!(limiter.rate(), 5.0);

    // The bucket was full under the old max_permits (10); after a rate
    // change that halves the rate, storedPermits should rescale rather than
    // silently exceed the new max_permits.
    let (stored, max_permits) = limiter.permit_snapshot();
    assert!(stored <= max_permits);
}

#[test]
fn next_free_ticket_is_monotonic_even_as_rate_changes_mid_stream() {
    let (limiter, clock) = bursty(5.0, 1.0);
    let mut last = i64::MIN;
    for step in 0..50 {
        if step == 10 {
            limiter.set_rate(20.0).unwrap();
        }
        if step == 30 {
            limiter.set_rate(2.0).unwrap();
        }
        if step % 2 == 0 {
            clock.advance(10_000);
        }
        limiter.acquire(1).unwrap();
        let now = Clock::read_micros(&*clock);
        assert!(now >= last);
        last = now;
    }
}
