use rand::Rng;
use std::time::Duration;

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
const JITTER_FRACTION: f64 = 0.10;

/// How a failed external call should be treated by the retry schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Recoverable by retry alone.
    Transient,
    /// Retrying cannot help; the caller must fall back.
    Permanent,
    /// Transient, but the next delay gets a minimum floor.
    RateLimited,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
            ErrorClass::RateLimited => "rate_limited",
        }
    }
}

pub fn classify_http_status(status: u16) -> ErrorClass {
    match status {
        429 => ErrorClass::RateLimited,
        400 | 401 | 403 | 404 => ErrorClass::Permanent,
        s if s >= 500 => ErrorClass::Transient,
        s if (400..500).contains(&s) => ErrorClass::Permanent,
        _ => ErrorClass::Transient,
    }
}

pub fn classify_reqwest(err: &reqwest::Error) -> ErrorClass {
    if let Some(status) = err.status() {
        return classify_http_status(status.as_u16());
    }
    if err.is_timeout() {
        return ErrorClass::Transient;
    }
    if err.is_decode() || err.is_body() {
        return ErrorClass::Permanent;
    }
    // reqwest folds TLS validation failures into connect errors; the only
    // usable signal is the error chain text.
    let chain = format!("{err:?}").to_lowercase();
    if chain.contains("certificate") || chain.contains("tls") {
        return ErrorClass::Permanent;
    }
    ErrorClass::Transient
}

/// Stateless retry schedule. All progress (attempt count, first-attempt
/// time) lives in the CR status so that a controller restart never resets
/// the schedule; this type only answers questions about it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Wall-clock budget across all attempts.
    pub timeout: Duration,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter: false,
        }
    }
}

impl RetryBackoff {
    /// Delay before attempt `attempt + 1`, with `attempt` counting
    /// completed attempts: 5s, 10s, 20s, 30s, 30s, ...
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        let secs = self.initial_delay.as_secs().saturating_mul(factor);
        Duration::from_secs(secs.min(self.max_delay.as_secs()))
    }

    /// Like [`next_delay`](Self::next_delay) but honouring the error
    /// class: rate limiting raises the floor to twice the initial delay.
    pub fn delay_after(&self, attempt: u32, class: ErrorClass) -> Duration {
        let base = self.next_delay(attempt);
        match class {
            ErrorClass::RateLimited => base.max(self.initial_delay * 2),
            _ => base,
        }
    }

    /// Applies ±10% jitter when enabled. Delay spreading avoids lockstep
    /// retries from many resources hitting a recovering dependency.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let spread = delay.as_secs_f64() * JITTER_FRACTION;
        let offset = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }

    pub fn is_exhausted(&self, elapsed: Duration) -> bool {
        elapsed >= self.timeout
    }

    pub fn remaining_time(&self, elapsed: Duration) -> Duration {
        self.timeout.saturating_sub(elapsed)
    }

    /// Attempts over max attempts, for status display.
    pub fn progress_percent(&self, attempts: u32) -> f64 {
        if self.max_attempts == 0 {
            return 100.0;
        }
        (attempts as f64 / self.max_attempts as f64 * 100.0).min(100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_doubles_then_caps() {
        let b = RetryBackoff::default();
        let delays: Vec<u64> = (0..6).map(|a| b.next_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 30, 30, 30]);
    }

    #[test]
    fn schedule_is_deterministic_without_jitter() {
        let b = RetryBackoff::default();
        for attempt in 0..40 {
            assert_eq!(b.next_delay(attempt), b.next_delay(attempt));
            assert_eq!(b.jittered(b.next_delay(attempt)), b.next_delay(attempt));
        }
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let b = RetryBackoff {
            jitter: true,
            ..Default::default()
        };
        for _ in 0..1000 {
            let d = b.jittered(Duration::from_secs(30)).as_secs_f64();
            assert!((27.0..=33.0).contains(&d), "jittered delay {d} out of range");
        }
    }

    #[test]
    fn rate_limit_floors_the_next_delay() {
        let b = RetryBackoff::default();
        // First retry would normally wait 5s; a 429 raises it to 10s.
        assert_eq!(
            b.delay_after(0, ErrorClass::RateLimited),
            Duration::from_secs(10)
        );
        // Later delays already exceed the floor and are unchanged.
        assert_eq!(
            b.delay_after(3, ErrorClass::RateLimited),
            Duration::from_secs(30)
        );
        assert_eq!(
            b.delay_after(1, ErrorClass::Transient),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn exhaustion_is_wall_clock_only() {
        let b = RetryBackoff::default();
        assert!(!b.is_exhausted(Duration::from_secs(299)));
        assert!(b.is_exhausted(Duration::from_secs(300)));
        assert_eq!(
            b.remaining_time(Duration::from_secs(295)),
            Duration::from_secs(5)
        );
        assert_eq!(b.remaining_time(Duration::from_secs(400)), Duration::ZERO);
    }

    #[test]
    fn full_schedule_reaches_ten_attempts_inside_the_budget() {
        // Cumulative starts: 0, 5, 15, 35, 65, 95, ... every 30s after.
        let b = RetryBackoff::default();
        let mut elapsed = Duration::ZERO;
        let mut attempts = 0u32;
        while !b.is_exhausted(elapsed) {
            attempts += 1;
            elapsed += b.next_delay(attempts - 1);
        }
        assert!(attempts >= 10, "only {attempts} attempts before exhaustion");
        let total = elapsed.as_secs() as i64;
        assert!((295..=315).contains(&total), "elapsed {total}s");
    }

    #[test]
    fn progress_percent_saturates() {
        let b = RetryBackoff::default();
        assert_eq!(b.progress_percent(5), 50.0);
        assert_eq!(b.progress_percent(25), 100.0);
    }

    #[test]
    fn http_status_classification() {
        assert_eq!(classify_http_status(429), ErrorClass::RateLimited);
        for s in [502, 503, 504, 500] {
            assert_eq!(classify_http_status(s), ErrorClass::Transient, "{s}");
        }
        for s in [400, 401, 403, 404, 422] {
            assert_eq!(classify_http_status(s), ErrorClass::Permanent, "{s}");
        }
    }
}
