// Circuit breaker for provider fault tolerance
//
// One breaker per adapter, held under the manager's per-adapter lock. The
// breaker itself is synchronous: callers acquire before dispatching and
// record the outcome after, so no lock is held across an await point.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Breaker state machine: closed -> open after `failure_threshold`
/// consecutive failures; open -> half-open once `timeout` has elapsed since
/// the last failure; half-open closes on success and re-opens on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    timeout: Duration,
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            timeout,
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
        }
    }

    /// Check whether a call may proceed. In the open state calls fail fast
    /// until the timeout elapses, then the next attempt transitions to
    /// half-open and is allowed through as a probe.
    pub fn try_acquire(&mut self) -> Result<(), CircuitOpenError> {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let waited_out = self
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.timeout);
                if waited_out {
                    self.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(CircuitOpenError {
                        retry_in: self
                            .last_failure
                            .map(|at| self.timeout.saturating_sub(at.elapsed())),
                    })
                }
            }
        }
    }

    /// Success closes the circuit from any state
    pub fn on_success(&mut self) {
        self.failure_count = 0;
        self.state = CircuitState::Closed;
    }

    /// Failure re-opens a half-open circuit immediately; a closed circuit
    /// opens once the threshold is reached
    pub fn on_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());

        if self.state == CircuitState::HalfOpen || self.failure_count >= self.failure_threshold {
            self.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Read-only view of whether a call would be allowed right now
    /// (does not perform the open -> half-open transition)
    pub fn would_allow(&self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => self
                .last_failure
                .is_some_and(|at| at.elapsed() >= self.timeout),
        }
    }

    #[cfg(test)]
    fn force_last_failure(&mut self, at: Instant) {
        self.last_failure = Some(at);
    }
}

/// Fail-fast signal from an open circuit
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpenError {
    pub retry_in: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_half_open_after_timeout() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Before the timeout: still failing fast
        assert!(breaker.try_acquire().is_err());

        // Simulate the timeout having elapsed
        breaker.force_last_failure(Instant::now() - Duration::from_secs(61));
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_success_closes() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.on_failure();
        breaker.force_last_failure(Instant::now() - Duration::from_secs(61));
        breaker.try_acquire().unwrap();

        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let mut breaker = CircuitBreaker::new(5, Duration::from_secs(60));
        // Open it the hard way
        for _ in 0..5 {
            breaker.on_failure();
        }
        breaker.force_last_failure(Instant::now() - Duration::from_secs(61));
        breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // One failure in half-open re-opens regardless of threshold
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.on_failure();
        breaker.on_failure();
        breaker.on_success();

        // Two more failures should not open (count restarted)
        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
