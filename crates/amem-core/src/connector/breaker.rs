//! Three-state circuit breaker.
//!
//! The breaker is a plain state machine: the caller passes the current
//! instant, and every state change comes back as a [`Transition`] so the
//! connector can report it. `Open -> HalfOpen` happens lazily inside
//! [`CircuitBreaker::admit`] once the open timeout has elapsed.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::ConnectorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected without reaching the backend
    Open,
    /// Trial calls decide whether to close again
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change, reported to monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Verdict for one incoming call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed { transition: Option<Transition> },
    Rejected { retry_in: Duration },
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    /// Times the breaker has entered `Open` since creation or reset
    pub times_opened: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: Duration,
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    times_opened: u64,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, success_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
            open_timeout,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            times_opened: 0,
        }
    }

    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self::new(
            config.failure_threshold,
            config.success_threshold,
            config.open_timeout(),
        )
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn admit(&mut self, now: Instant) -> Admission {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Admission::Allowed { transition: None },
            CircuitState::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed >= self.open_timeout {
                    self.consecutive_successes = 0;
                    Admission::Allowed {
                        transition: Some(self.move_to(CircuitState::HalfOpen)),
                    }
                } else {
                    Admission::Rejected {
                        retry_in: self.open_timeout - elapsed,
                    }
                }
            }
        }
    }

    pub fn record_success(&mut self) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                None
            }
            CircuitState::HalfOpen => {
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.success_threshold {
                    self.consecutive_failures = 0;
                    self.consecutive_successes = 0;
                    self.opened_at = None;
                    Some(self.move_to(CircuitState::Closed))
                } else {
                    None
                }
            }
            // A call admitted before the circuit opened finished late
            CircuitState::Open => None,
        }
    }

    pub fn record_failure(&mut self, now: Instant) -> Option<Transition> {
        match self.state {
            CircuitState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    Some(self.trip(now))
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                self.consecutive_failures += 1;
                Some(self.trip(now))
            }
            CircuitState::Open => None,
        }
    }

    /// Force the breaker closed and clear its counters.
    pub fn reset(&mut self) -> Option<Transition> {
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        self.opened_at = None;
        self.times_opened = 0;
        if self.state == CircuitState::Closed {
            None
        } else {
            Some(self.move_to(CircuitState::Closed))
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            times_opened: self.times_opened,
        }
    }

    fn trip(&mut self, now: Instant) -> Transition {
        self.opened_at = Some(now);
        self.consecutive_successes = 0;
        self.times_opened += 1;
        self.move_to(CircuitState::Open)
    }

    fn move_to(&mut self, to: CircuitState) -> Transition {
        let from = self.state;
        self.state = to;
        Transition { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, 2, Duration::from_secs(30))
    }

    #[test]
    fn test_starts_closed() {
        let b = breaker();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_opens_at_threshold() {
        let now = Instant::now();
        let mut b = breaker();
        assert_eq!(b.record_failure(now), None);
        assert_eq!(b.record_failure(now), None);
        assert_eq!(
            b.record_failure(now),
            Some(Transition {
                from: CircuitState::Closed,
                to: CircuitState::Open
            })
        );
        assert_eq!(b.snapshot().times_opened, 1);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let now = Instant::now();
        let mut b = breaker();
        b.record_failure(now);
        b.record_failure(now);
        b.record_success();
        b.record_failure(now);
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 1);
    }

    #[test]
    fn test_open_rejects_until_timeout() {
        let now = Instant::now();
        let mut b = breaker();
        for _ in 0..3 {
            b.record_failure(now);
        }

        match b.admit(now + Duration::from_secs(10)) {
            Admission::Rejected { retry_in } => assert_eq!(retry_in, Duration::from_secs(20)),
            other => panic!("expected rejection, got {:?}", other),
        }

        match b.admit(now + Duration::from_secs(30)) {
            Admission::Allowed {
                transition: Some(t),
            } => {
                assert_eq!(t.from, CircuitState::Open);
                assert_eq!(t.to, CircuitState::HalfOpen);
            }
            other => panic!("expected half-open admission, got {:?}", other),
        }
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let now = Instant::now();
        let mut b = breaker();
        for _ in 0..3 {
            b.record_failure(now);
        }
        b.admit(now + Duration::from_secs(31));

        assert_eq!(b.record_success(), None);
        assert_eq!(b.state(), CircuitState::HalfOpen);
        let t = b.record_success().unwrap();
        assert_eq!(t.to, CircuitState::Closed);
        assert_eq!(b.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let now = Instant::now();
        let mut b = breaker();
        for _ in 0..3 {
            b.record_failure(now);
        }
        let later = now + Duration::from_secs(31);
        b.admit(later);
        b.record_success();

        let t = b.record_failure(later).unwrap();
        assert_eq!(t.from, CircuitState::HalfOpen);
        assert_eq!(t.to, CircuitState::Open);
        assert_eq!(b.snapshot().times_opened, 2);

        // The open window restarts from the half-open failure
        assert!(matches!(
            b.admit(later + Duration::from_secs(29)),
            Admission::Rejected { .. }
        ));
    }

    #[test]
    fn test_reset_closes() {
        let now = Instant::now();
        let mut b = breaker();
        for _ in 0..3 {
            b.record_failure(now);
        }
        assert_eq!(b.reset().unwrap().to, CircuitState::Closed);
        assert_eq!(b.reset(), None);
        assert_eq!(b.snapshot().times_opened, 0);
    }

    #[test]
    fn test_zero_thresholds_are_clamped() {
        let now = Instant::now();
        let mut b = CircuitBreaker::new(0, 0, Duration::ZERO);
        assert!(b.record_failure(now).is_some());
        assert!(matches!(
            b.admit(now),
            Admission::Allowed { transition: Some(_) }
        ));
        assert_eq!(b.record_success().unwrap().to, CircuitState::Closed);
    }
}
