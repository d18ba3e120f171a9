use std::time::{Duration, Instant};

/// Exponential reconnect backoff with a fixed ceiling.
///
/// Each consecutive failure doubles the wait, never past `max`. A success
/// resets the sequence so the next outage starts from `initial` again.
#[derive(Debug, Clone)]
pub struct BackoffController {
    initial: Duration,
    max: Duration,
    current: Duration,
    failures: u64,
    next_retry: Option<Instant>,
}

impl BackoffController {
    pub fn new(initial_ms: u64, max_ms: u64) -> Self {
        let initial = Duration::from_millis(initial_ms.max(1));
        let max = Duration::from_millis(max_ms.max(initial_ms.max(1)));
        Self {
            initial,
            max,
            current: initial,
            failures: 0,
            next_retry: None,
        }
    }

    /// Apply new bounds without forgetting how many failures happened.
    pub fn update(&mut self, initial_ms: u64, max_ms: u64) {
        let failures = self.failures;
        *self = Self::new(initial_ms, max_ms);
        for _ in 1..failures {
            self.advance();
        }
        self.failures = failures;
    }

    /// Whether the wait from the last failure has elapsed.
    pub fn should_retry(&self, now: Instant) -> bool {
        self.next_retry.map_or(true, |at| now >= at)
    }

    /// Record a failed attempt and return the wait before the next one.
    pub fn mark_failure(&mut self, now: Instant) -> Duration {
        let delay = if self.failures == 0 {
            self.initial
        } else {
            self.advance()
        };
        self.failures += 1;
        self.next_retry = Some(now + delay);
        delay
    }

    pub fn mark_success(&mut self, _now: Instant) {
        self.current = self.initial;
        self.failures = 0;
        self.next_retry = None;
    }

    /// Time left before `should_retry` turns true.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.next_retry
            .map(|at| at.saturating_duration_since(now))
            .unwrap_or_default()
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn current_delay(&self) -> Duration {
        self.current
    }

    pub fn max_delay(&self) -> Duration {
        self.max
    }

    fn advance(&mut self) -> Duration {
        self.current = self.current.saturating_mul(2).min(self.max);
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_until_cap() {
        let mut backoff = BackoffController::new(100, 450);
        let now = Instant::now();
        let delays: Vec<u128> = (0..5)
            .map(|_| backoff.mark_failure(now).as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 450, 450]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn success_resets_sequence() {
        let mut backoff = BackoffController::new(50, 1_000);
        let now = Instant::now();
        backoff.mark_failure(now);
        backoff.mark_failure(now);
        assert!(!backoff.should_retry(now));
        backoff.mark_success(now);
        assert!(backoff.should_retry(now));
        assert_eq!(backoff.mark_failure(now), Duration::from_millis(50));
    }

    #[test]
    fn should_retry_after_wait() {
        let mut backoff = BackoffController::new(10, 100);
        let now = Instant::now();
        backoff.mark_failure(now);
        assert!(!backoff.should_retry(now));
        assert!(backoff.should_retry(now + Duration::from_millis(10)));
        assert_eq!(backoff.remaining(now), Duration::from_millis(10));
    }

    #[test]
    fn update_keeps_failure_count() {
        let mut backoff = BackoffController::new(10, 100);
        let now = Instant::now();
        backoff.mark_failure(now);
        backoff.mark_failure(now);
        backoff.update(20, 1_000);
        assert_eq!(backoff.failures(), 2);
        assert_eq!(backoff.mark_failure(now), Duration::from_millis(80));
    }
}
