//! Reconnect policy for the session manager.
//!
//! The first restart after a close is immediate. Consecutive failures (closes
//! or failed handshakes without ever reaching `Open`) back off exponentially
//! with jitter, and give up after `max_attempts`.

use std::time::Duration;

use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: Some(10),
        }
    }
}

impl ReconnectPolicy {
    /// Un-jittered delay before restart number `failure` (1-based).
    pub fn base_delay_for(&self, failure: u32) -> Duration {
        if failure <= 1 {
            return Duration::ZERO;
        }
        let exp = (failure - 2).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Consecutive-failure counter driven by the session manager.
#[derive(Debug)]
pub struct Backoff {
    policy: ReconnectPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Called when a session reaches `Open`.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Record a failure and return how long to wait before the next attempt,
    /// or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if let Some(max) = self.policy.max_attempts {
            if self.failures > max {
                return None;
            }
        }

        let base = self.policy.base_delay_for(self.failures);
        if base.is_zero() {
            return Some(base);
        }
        // ±20% so a fleet of restarting bots doesn't reconnect in lockstep.
        let factor = rand::thread_rng().gen_range(0.8..=1.2);
        Some(base.mul_f64(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(8000),
            max_attempts,
        }
    }

    #[test]
    fn first_restart_is_immediate() {
        let mut backoff = Backoff::new(policy(Some(3)));
        assert_eq!(backoff.next_delay(), Some(Duration::ZERO));
    }

    #[test]
    fn base_delay_doubles_and_caps() {
        let p = policy(None);
        assert_eq!(p.base_delay_for(1), Duration::ZERO);
        assert_eq!(p.base_delay_for(2), Duration::from_millis(1000));
        assert_eq!(p.base_delay_for(3), Duration::from_millis(2000));
        assert_eq!(p.base_delay_for(4), Duration::from_millis(4000));
        assert_eq!(p.base_delay_for(5), Duration::from_millis(8000));
        assert_eq!(p.base_delay_for(40), Duration::from_millis(8000));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        for _ in 0..50 {
            let mut b = Backoff::new(policy(None));
            b.next_delay();
            let d = b.next_delay().unwrap();
            assert!(d >= Duration::from_millis(800), "{d:?}");
            assert!(d <= Duration::from_millis(1200), "{d:?}");
        }
    }

    #[test]
    fn gives_up_after_max_attempts_and_reset_restores_budget() {
        let mut backoff = Backoff::new(policy(Some(2)));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert_eq!(backoff.failures(), 3);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::ZERO));
    }
}
