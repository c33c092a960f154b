use std::time::{Duration, Instant};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_TIMEOUT_MULTIPLIER: u32 = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Gauge encoding: 0=closed, 1=open, 2=half-open.
    pub fn as_gauge(&self) -> i64 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }
}

/// Per-channel delivery breaker. State is process-local; a restarted
/// controller starts Closed, which is the conservative choice because a
/// skipped channel can never be retried by anyone else.
///
/// Time is always passed in so the transitions stay testable.
#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    open_timeout: Duration,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    timeout_multiplier: u32,
    trial_in_flight: bool,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        CircuitBreaker::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_OPEN_TIMEOUT)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        CircuitBreaker {
            failure_threshold,
            open_timeout,
            consecutive_failures: 0,
            opened_at: None,
            timeout_multiplier: 1,
            trial_in_flight: false,
        }
    }

    fn current_timeout(&self) -> Duration {
        self.open_timeout * self.timeout_multiplier
    }

    pub fn state(&self, now: Instant) -> BreakerState {
        match self.opened_at {
            None => BreakerState::Closed,
            Some(opened_at) => {
                if now.duration_since(opened_at) >= self.current_timeout() {
                    BreakerState::HalfOpen
                } else {
                    BreakerState::Open
                }
            }
        }
    }

    /// Whether a delivery attempt may go out right now. In half-open
    /// state exactly one trial is admitted until its outcome is
    /// reported.
    pub fn allow_request(&mut self, now: Instant) -> bool {
        match self.state(now) {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if self.trial_in_flight {
                    false
                } else {
                    self.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Time until the breaker will admit a trial, for requeue scheduling.
    pub fn retry_after(&self, now: Instant) -> Option<Duration> {
        let opened_at = self.opened_at?;
        let deadline = opened_at + self.current_timeout();
        Some(deadline.saturating_duration_since(now))
    }

    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.timeout_multiplier = 1;
        self.trial_in_flight = false;
    }

    pub fn on_failure(&mut self, now: Instant) {
        if self.trial_in_flight {
            // The half-open trial failed; reopen with a longer timeout.
            self.trial_in_flight = false;
            self.timeout_multiplier =
                (self.timeout_multiplier * 2).min(MAX_TIMEOUT_MULTIPLIER);
            self.opened_at = Some(now);
            return;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.failure_threshold && self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_state_is_closed() {
        let breaker = CircuitBreaker::default();
        assert_eq!(breaker.state(Instant::now()), BreakerState::Closed);
    }

    #[test]
    fn opens_after_five_consecutive_failures() {
        let mut breaker = CircuitBreaker::default();
        let now = Instant::now();
        for _ in 0..4 {
            breaker.on_failure(now);
            assert_eq!(breaker.state(now), BreakerState::Closed);
        }
        breaker.on_failure(now);
        assert_eq!(breaker.state(now), BreakerState::Open);
        assert!(!breaker.allow_request(now));
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let mut breaker = CircuitBreaker::default();
        let now = Instant::now();
        for _ in 0..4 {
            breaker.on_failure(now);
        }
        breaker.on_success();
        breaker.on_failure(now);
        assert_eq!(breaker.state(now), BreakerState::Closed);
    }

    #[test]
    fn half_open_admits_exactly_one_trial() {
        let mut breaker = CircuitBreaker::default();
        let t0 = Instant::now();
        for _ in 0..5 {
            breaker.on_failure(t0);
        }
        let after_timeout = t0 + DEFAULT_OPEN_TIMEOUT + Duration::from_secs(1);
        assert_eq!(breaker.state(after_timeout), BreakerState::HalfOpen);
        assert!(breaker.allow_request(after_timeout));
        assert!(!breaker.allow_request(after_timeout));
    }

    #[test]
    fn trial_success_closes() {
        let mut breaker = CircuitBreaker::default();
        let t0 = Instant::now();
        for _ in 0..5 {
            breaker.on_failure(t0);
        }
        let later = t0 + DEFAULT_OPEN_TIMEOUT + Duration::from_secs(1);
        assert!(breaker.allow_request(later));
        breaker.on_success();
        assert_eq!(breaker.state(later), BreakerState::Closed);
        assert!(breaker.allow_request(later));
    }

    #[test]
    fn trial_failure_reopens_with_extended_timeout() {
        let mut breaker = CircuitBreaker::default();
        let t0 = Instant::now();
        for _ in 0..5 {
            breaker.on_failure(t0);
        }
        let trial_time = t0 + DEFAULT_OPEN_TIMEOUT + Duration::from_secs(1);
        assert!(breaker.allow_request(trial_time));
        breaker.on_failure(trial_time);
        // One timeout after the failed trial: still open (doubled).
        let one_timeout_later = trial_time + DEFAULT_OPEN_TIMEOUT + Duration::from_secs(1);
        assert_eq!(breaker.state(one_timeout_later), BreakerState::Open);
        let two_timeouts_later = trial_time + DEFAULT_OPEN_TIMEOUT * 2 + Duration::from_secs(1);
        assert_eq!(breaker.state(two_timeouts_later), BreakerState::HalfOpen);
    }

    #[test]
    fn retry_after_counts_down() {
        let mut breaker = CircuitBreaker::default();
        let t0 = Instant::now();
        for _ in 0..5 {
            breaker.on_failure(t0);
        }
        let half_way = t0 + Duration::from_secs(30);
        let remaining = breaker.retry_after(half_way).unwrap();
        assert!(remaining <= Duration::from_secs(30), "{remaining:?}");
        assert!(remaining > Duration::from_secs(25), "{remaining:?}");
    }
}
