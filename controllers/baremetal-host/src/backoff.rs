//! # Exponential Backoff
//!
//! Retry delay for hosts whose last operation failed.
//!
//! The delay roughly doubles with each consecutive failure, starting around
//! one minute. Up to half of it is removed at random so that many hosts
//! failing together do not retry in lockstep. The exponent is capped, which
//! puts the ceiling at a little over eight hours.

use rand::Rng;
use std::time::Duration;

/// Highest exponent used by [`calculate_backoff`]
pub const MAX_BACKOFF_COUNT: u32 = 9;

/// Backoff for the `error_count`-th consecutive failure.
///
/// Returns a duration in `[2^n * 0.5, 2^n]` minutes with
/// `n = min(error_count, MAX_BACKOFF_COUNT)`. The random source is passed in
/// so tests can use a seeded generator.
pub fn calculate_backoff<R: Rng>(error_count: u32, rng: &mut R) -> Duration {
    let count = error_count.min(MAX_BACKOFF_COUNT);
    let base = f64::from(1u32 << count);
    let jitter = rng.gen_range(0.0..1.0) * base * 0.5;
    Duration::from_secs_f64((base - jitter) * 60.0)
}
