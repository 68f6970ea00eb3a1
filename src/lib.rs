//! Token-bucket rate limiting and a type-hierarchy-aware event bus.
//!
//! This crate provides two independent, in-process concurrency primitives:
//!
//! - [`limiter`]: a smooth rate limiter with a burst-tolerant mode
//!   ([`limiter::RateLimiter::smooth_bursty`]) and a cold-start warm-up mode
//!   ([`limiter::RateLimiter::smooth_warming_up`]).
//! - [`bus`]: a publish/subscribe event bus ([`bus::EventBus`]) with
//!   pluggable dispatch strategies and a type-hierarchy-aware subscriber
//!   registry.
//!
//! A third, much smaller surface — [`cache`] — exposes a validated
//! configuration object in the shape of Guava's `CacheBuilder`, backed by a
//! small single-map cache. The segmented, striped-concurrency eviction
//! engine a production port would front is out of scope; `CacheBuilder`'s
//! validation and the removal/stats/loader contracts are the point.

pub mod bus;
pub mod cache;
pub mod clock;
pub mod error;
pub mod limiter;

pub use error::Error;
