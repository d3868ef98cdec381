//! # Flood prevention for cell restarts.
//!
//! A cell that faults is always rebuilt, but a cell that keeps faulting must not
//! saturate the host with back-to-back reboots. [`FloodGuard`] remembers the
//! instants of recent faults inside a sliding [`FloodPolicy::window`]:
//!
//! ```text
//! faults in window <= threshold  → base_delay
//! faults in window  > threshold  → backoff.next(faults - threshold - 1)
//! ```
//!
//! Clean restarts (deployment change, explicit command) are not faults and are
//! never recorded.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::policies::BackoffPolicy;

/// Knobs for restart flood prevention.
#[derive(Clone, Copy, Debug)]
pub struct FloodPolicy {
    /// Sliding window over which faults are counted.
    pub window: Duration,
    /// Number of faults tolerated inside the window at `base_delay`.
    pub threshold: u32,
    /// Delay before rebooting after an isolated fault.
    pub base_delay: Duration,
    /// Escalation once the threshold is crossed.
    pub backoff: BackoffPolicy,
}

impl Default for FloodPolicy {
    /// `window = 5min`, `threshold = 3`, `base_delay = 1s`, `backoff = BackoffPolicy::default()`.
    fn default() -> Self {
        Self {
            window: Duration::from_secs(300),
            threshold: 3,
            base_delay: Duration::from_secs(1),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Delay decision returned by [`FloodGuard::record_fault`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RestartDelay {
    /// How long to wait before the next boot.
    pub delay: Duration,
    /// Faults currently inside the window (including this one).
    pub recent_faults: u32,
    /// Whether the threshold was crossed.
    pub flooding: bool,
}

/// Sliding-window fault counter for one supervisor.
#[derive(Debug)]
pub struct FloodGuard {
    policy: FloodPolicy,
    faults: VecDeque<Instant>,
}

impl FloodGuard {
    /// Creates an empty guard.
    pub fn new(policy: FloodPolicy) -> Self {
        Self {
            policy,
            faults: VecDeque::new(),
        }
    }

    /// Records a fault at `now` and returns the delay before the next boot.
    pub fn record_fault(&mut self, now: Instant) -> RestartDelay {
        self.faults.push_back(now);
        self.evict(now);

        let recent = self.faults.len() as u32;
        if recent <= self.policy.threshold {
            return RestartDelay {
                delay: self.policy.base_delay,
                recent_faults: recent,
                flooding: false,
            };
        }
        RestartDelay {
            delay: self.policy.backoff.next(recent - self.policy.threshold - 1),
            recent_faults: recent,
            flooding: true,
        }
    }

    /// Faults currently inside the window.
    pub fn recent_faults(&mut self, now: Instant) -> u32 {
        self.evict(now);
        self.faults.len() as u32
    }

    fn evict(&mut self, now: Instant) {
        while let Some(first) = self.faults.front() {
            if now.saturating_duration_since(*first) > self.policy.window {
                self.faults.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::JitterPolicy;

    fn policy() -> FloodPolicy {
        FloodPolicy {
            window: Duration::from_secs(60),
            threshold: 2,
            base_delay: Duration::from_secs(1),
            backoff: BackoffPolicy {
                first: Duration::from_secs(10),
                max: Duration::from_secs(100),
                factor: 2.0,
                jitter: JitterPolicy::None,
            },
        }
    }

    #[test]
    fn escalates_after_threshold() {
        let mut guard = FloodGuard::new(policy());
        let t0 = Instant::now();

        assert_eq!(guard.record_fault(t0).delay, Duration::from_secs(1));
        assert_eq!(guard.record_fault(t0).delay, Duration::from_secs(1));

        let third = guard.record_fault(t0);
        assert!(third.flooding);
        assert_eq!(third.delay, Duration::from_secs(10));
        assert_eq!(guard.record_fault(t0).delay, Duration::from_secs(20));
    }

    #[test]
    fn old_faults_leave_the_window() {
        let mut guard = FloodGuard::new(policy());
        let t0 = Instant::now();
        for _ in 0..5 {
            guard.record_fault(t0);
        }
        let later = t0 + Duration::from_secs(120);
        let d = guard.record_fault(later);
        assert!(!d.flooding);
        assert_eq!(d.recent_faults, 1);
        assert_eq!(d.delay, Duration::from_secs(1));
    }
}
