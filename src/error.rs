//! Typed failures for both subsystems.
//!
//! Configuration errors and invariant violations are reported synchronously
//! to the caller; they are never surfaced through the event bus's exception
//! handler, which exists only for failures raised *by subscribers*.

use thiserror::Error;

/// Everything that can go wrong building or driving a [`crate::limiter`] or
/// [`crate::bus`].
#[derive(Debug, Error, PartialEq, Clone)]
pub enum Error {
    /// `RateLimiter::set_rate`/`with_rate` was given a non-positive or
    /// non-finite rate.
    #[error("rate must be positive and finite, got {0}")]
    InvalidRate(f64),

    /// `acquire`/`try_acquire` was asked for fewer than one permit.
    #[error("permits must be >= 1, got {0}")]
    InvalidPermits(u32),

    /// A rate-limiter construction parameter other than the rate itself
    /// (`max_burst_seconds`, `cold_factor`, `warmup_period`) was non-positive
    /// or non-finite.
    #[error("{name} must be positive and finite, got {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    /// A `CacheBuilder` option was set twice.
    #[error("{0} was already set")]
    DuplicateOption(&'static str),

    /// A `CacheBuilder` numeric option was out of its documented range.
    #[error("{option} must be {constraint}, got {value}")]
    InvalidOption {
        option: &'static str,
        constraint: &'static str,
        value: i64,
    },

    /// `build()` was called after `refresh_after_write` without a loader, or
    /// `maximum_weight`/`weigher` was set without its required partner.
    #[error("{0}")]
    MissingRequiredOption(&'static str),

    /// `unregister` was called for a listener that was never registered (or
    /// already unregistered).
    #[error("listener was not registered")]
    NotRegistered,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
