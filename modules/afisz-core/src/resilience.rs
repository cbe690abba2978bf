//! Resilience primitives guarding outbound calls to external providers:
//! a process-wide rate limiter, a retry policy for transient failures, and a
//! count-based circuit breaker. Policies are constructed once from config and
//! shared behind the client decorators instead of being re-implemented at
//! call sites.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Enforces a minimum interval between outbound requests across the process.
/// Callers sleep the difference; the lock is held through the sleep so that
/// concurrent callers are spaced out rather than released in a burst.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Retry with exponential backoff, doubling from `initial_backoff` with a
/// little jitter. Only errors the caller classifies as transient are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
        }
    }

    pub async fn run<T, E, F, Fut, C>(&self, mut op: F, is_transient: C) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && is_transient(&err) => {
                    let jitter = Duration::from_millis(rand::rng().random_range(0..100));
                    warn!(attempt, error = %err, "transient failure, backing off");
                    tokio::time::sleep(backoff + jitter).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure percentage (0–100) at which the circuit trips.
    pub failure_rate_threshold: f64,
    /// Count-based sliding window size.
    pub window_size: usize,
    /// Minimum recorded calls before the rate is evaluated.
    pub min_calls: usize,
    /// How long the circuit stays open before probing.
    pub open_wait: Duration,
    /// Calls permitted while half-open.
    pub half_open_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            window_size: 100,
            min_calls: 10,
            open_wait: Duration::from_secs(30),
            half_open_probes: 10,
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    /// Sliding window of call outcomes, `true` = failure.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_permits: u32,
    half_open_successes: u32,
}

/// Count-based circuit breaker. Trips when the failure rate over the sliding
/// window crosses the threshold, stays open for `open_wait`, then lets a
/// limited number of probes through before closing again.
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: StdMutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: StdMutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                half_open_permits: 0,
                half_open_successes: 0,
            }),
        }
    }

    /// Ask for permission to make a call. `false` means the circuit is open
    /// and the caller must take its fallback path without going outbound.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.open_wait);
                if elapsed >= self.config.open_wait {
                    debug!(breaker = self.name, "circuit half-open, probing");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_permits = self.config.half_open_probes.saturating_sub(1);
                    inner.half_open_successes = 0;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_permits > 0 {
                    inner.half_open_permits -= 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_probes {
                    debug!(breaker = self.name, "circuit closed");
                    inner.state = CircuitState::Closed;
                    inner.window.clear();
                    inner.opened_at = None;
                }
            }
            _ => self.push_outcome(&mut inner, false),
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::HalfOpen => {
                warn!(breaker = self.name, "probe failed, circuit re-opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            _ => self.push_outcome(&mut inner, true),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    fn push_outcome(&self, inner: &mut BreakerInner, failure: bool) {
        if inner.window.len() == self.config.window_size {
            inner.window.pop_front();
        }
        inner.window.push_back(failure);

        if inner.window.len() < self.config.min_calls {
            return;
        }
        let failures = inner.window.iter().filter(|failed| **failed).count();
        let rate = failures as f64 * 100.0 / inner.window.len() as f64;
        if rate >= self.config.failure_rate_threshold {
            warn!(
                breaker = self.name,
                failure_rate = rate,
                calls = inner.window.len(),
                "failure rate over threshold, circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", CircuitBreakerConfig::default())
    }

    #[test]
    fn consecutive_failures_open_the_circuit() {
        let cb = breaker();
        for _ in 0..10 {
            assert!(cb.try_acquire());
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
    }

    #[test]
    fn below_min_calls_never_trips() {
        let cb = breaker();
        for _ in 0..9 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[test]
    fn mixed_outcomes_below_threshold_stay_closed() {
        let cb = breaker();
        for i in 0..20 {
            if i % 3 == 0 {
                cb.record_failure();
            } else {
                cb.record_success();
            }
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn open_circuit_probes_after_wait() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                open_wait: Duration::ZERO,
                ..Default::default()
            },
        );
        for _ in 0..10 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Wait elapsed (zero), so the next acquire transitions to half-open.
        assert!(cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // 10 successful probes close it again.
        cb.record_success();
        for _ in 0..9 {
            assert!(cb.try_acquire());
            cb.record_success();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn failed_probe_reopens() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                open_wait: Duration::ZERO,
                ..Default::default()
            },
        );
        for _ in 0..10 {
            cb.record_failure();
        }
        assert!(cb.try_acquire());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn retry_stops_on_permanent_error() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<(), String> = policy
            .run(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err("bad request".to_string()) }
                },
                |_| false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_errors() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<u32, String> = policy
            .run(
                || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err("connection reset".to_string())
                        } else {
                            Ok(42)
                        }
                    }
                },
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result: Result<(), String> = policy
            .run(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err("timeout".to_string()) }
                },
                |_| true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limiter_spaces_out_calls() {
        let limiter = RateLimiter::new(Duration::from_millis(30));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(60));
    }
}
