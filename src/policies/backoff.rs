//! # Exponential backoff for repeated cell faults.
//!
//! [`BackoffPolicy`] computes `first × factor^step`, clamped to `max`, then
//! applies jitter. The base depends only on the step number, so jitter output
//! never feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use cellvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(5),
//!     max: Duration::from_secs(60),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_secs(5));
//! assert_eq!(backoff.next(2), Duration::from_secs(20));
//! assert_eq!(backoff.next(10), Duration::from_secs(60));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Retry backoff policy.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Delay for step 0.
    pub first: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Jitter applied to the clamped base.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 5s`, `factor = 2.0`, `max = 5min`, equal jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(5),
            max: Duration::from_secs(300),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Computes the delay for the given step (0-indexed).
    pub fn next(&self, step: u32) -> Duration {
        let exp = step.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn grows_exponentially_then_caps() {
        let p = plain(100, 1_000, 2.0);
        assert_eq!(p.next(0), Duration::from_millis(100));
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(3), Duration::from_millis(800));
        assert_eq!(p.next(4), Duration::from_millis(1_000));
    }

    #[test]
    fn first_above_max_is_clamped() {
        assert_eq!(plain(10_000, 5_000, 2.0).next(0), Duration::from_millis(5_000));
    }

    #[test]
    fn overflow_clamps_to_max() {
        assert_eq!(plain(100, 10_000, 2.0).next(u32::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn jitter_never_exceeds_base() {
        let p = BackoffPolicy {
            jitter: JitterPolicy::Full,
            ..plain(1_000, 30_000, 2.0)
        };
        for step in 0..10 {
            let base = Duration::from_millis((1_000.0 * 2f64.powi(step as i32)).min(30_000.0) as u64);
            assert!(p.next(step) <= base);
        }
    }
}
