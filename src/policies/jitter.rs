//! # Jitter policy for restart delays.
//!
//! [`JitterPolicy`] randomizes restart delays so that cells crashing together
//! (e.g. after a shared storage outage) do not reboot in lock-step.
//!
//! - [`JitterPolicy::None`] exact delays
//! - [`JitterPolicy::Full`] uniform in `[0, delay]`
//! - [`JitterPolicy::Equal`] `delay/2 + uniform[0, delay/2]`

use rand::Rng;
use std::time::Duration;

/// Randomization applied on top of a computed delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// No jitter: use exact delay.
    #[default]
    None,
    /// Random delay in `[0, delay]`.
    Full,
    /// Half the delay plus a random share of the other half.
    Equal,
}

impl JitterPolicy {
    /// Applies jitter to the given delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                let extra = if half == 0 { 0 } else { rng.random_range(0..=half) };
                Duration::from_millis(half + extra)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let d = Duration::from_millis(1234);
        assert_eq!(JitterPolicy::None.apply(d), d);
    }

    #[test]
    fn full_and_equal_stay_in_bounds() {
        let d = Duration::from_millis(1000);
        for _ in 0..200 {
            assert!(JitterPolicy::Full.apply(d) <= d);
            let eq = JitterPolicy::Equal.apply(d);
            assert!(eq >= Duration::from_millis(500) && eq <= d);
        }
    }

    #[test]
    fn zero_stays_zero() {
        assert_eq!(JitterPolicy::Equal.apply(Duration::ZERO), Duration::ZERO);
    }
}
