//! Per-tier circuit breaker with retry/backoff.
//!
//! Generalizes the circuit-breaker-plus-retry-policy pair used to guard
//! HTTP backend calls elsewhere in this codebase's API gateway into a
//! generic guard usable in front of any externally observable tier
//! (persistent, or a caller-supplied shared tier). The memory tier is
//! never wrapped — its failures are not externally observable.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;

use crate::error::{CacheError, CacheResult};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through normally.
    Closed,
    /// Calls are short-circuited to failure until the cooldown elapses.
    Open,
    /// A single probe call is allowed through to test recovery.
    HalfOpen,
}

/// Configuration for [`FailureGuard`].
#[derive(Debug, Clone, Copy)]
pub struct FailureGuardConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Consecutive half-open successes before the breaker fully closes.
    pub success_threshold: u32,
    /// How long the breaker stays open before allowing a probe.
    pub cooldown: Duration,
    /// Maximum retry attempts per call.
    pub retry_attempts: u32,
    /// Base delay before the first retry; doubles on each subsequent one.
    pub retry_delay: Duration,
}

impl Default for FailureGuardConfig {
    fn default() -> Self {
        FailureGuardConfig {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Instant,
}

/// Wraps a tier (or any externally observable operation) with a circuit
/// breaker and exponential-backoff retry.
pub struct FailureGuard {
    tier_name: String,
    config: FailureGuardConfig,
    state: Arc<RwLock<BreakerState>>,
}

impl FailureGuard {
    /// Build a guard in the closed state.
    pub fn new(tier_name: impl Into<String>, config: FailureGuardConfig) -> Self {
        FailureGuard {
            tier_name: tier_name.into(),
            config,
            state: Arc::new(RwLock::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: Instant::now(),
            })),
        }
    }

    /// Current breaker state, auto-transitioning `Open` → `HalfOpen` if
    /// the cooldown has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut guard = self.state.write();
        if guard.state == CircuitState::Open && guard.opened_at.elapsed() >= self.config.cooldown {
            guard.state = CircuitState::HalfOpen;
            guard.consecutive_successes = 0;
            tracing::info!(tier = %self.tier_name, "circuit breaker half-open, probing");
        }
        guard.state
    }

    fn record_success(&self) {
        let mut guard = self.state.write();
        match guard.state {
            CircuitState::Closed => {
                guard.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                guard.consecutive_successes += 1;
                if guard.consecutive_successes >= self.config.success_threshold {
                    guard.state = CircuitState::Closed;
                    guard.consecutive_failures = 0;
                    guard.consecutive_successes = 0;
                    tracing::info!(tier = %self.tier_name, "circuit breaker closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut guard = self.state.write();
        match guard.state {
            CircuitState::Closed => {
                guard.consecutive_failures += 1;
                if guard.consecutive_failures >= self.config.failure_threshold {
                    guard.state = CircuitState::Open;
                    guard.opened_at = Instant::now();
                    tracing::warn!(tier = %self.tier_name, "circuit breaker open");
                }
            }
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Open;
                guard.opened_at = Instant::now();
                guard.consecutive_successes = 0;
                tracing::warn!(tier = %self.tier_name, "circuit breaker re-opened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    /// Run `operation` with retry-with-backoff, short-circuiting
    /// immediately while the breaker is open.
    pub async fn call<F, Fut, T>(&self, operation: F) -> CacheResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        if self.state() == CircuitState::Open {
            return Err(CacheError::TierUnavailable(format!(
                "{} circuit breaker open",
                self.tier_name
            )));
        }

        let mut delay = self.config.retry_delay;
        let mut last_err = None;
        for attempt in 0..=self.config.retry_attempts {
            match operation().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(err) => {
                    tracing::warn!(tier = %self.tier_name, attempt, error = %err, "tier call failed");
                    last_err = Some(err);
                    if attempt < self.config.retry_attempts {
                        let jitter = rand::thread_rng().gen_range(0.0..0.25);
                        let sleep_for = delay.mul_f64(1.0 + jitter);
                        tokio::time::sleep(sleep_for).await;
                        delay *= 2;
                    }
                }
            }
        }
        self.record_failure();
        Err(last_err.unwrap_or_else(|| CacheError::internal("retry loop exited without a result")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn successful_call_keeps_breaker_closed() {
        let guard = FailureGuard::new("test", FailureGuardConfig::default());
        let result: CacheResult<u32> = guard.call(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(guard.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_failures() {
        let config = FailureGuardConfig {
            failure_threshold: 2,
            retry_attempts: 0,
            retry_delay: Duration::from_millis(1),
            ..FailureGuardConfig::default()
        };
        let guard = FailureGuard::new("test", config);
        for _ in 0..2 {
            let _: CacheResult<()> = guard
                .call(|| async { Err(CacheError::internal("boom")) })
                .await;
        }
        assert_eq!(guard.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_breaker_short_circuits() {
        let config = FailureGuardConfig {
            failure_threshold: 1,
            retry_attempts: 0,
            retry_delay: Duration::from_millis(1),
            cooldown: Duration::from_secs(60),
            ..FailureGuardConfig::default()
        };
        let guard = FailureGuard::new("test", config);
        let _: CacheResult<()> = guard
            .call(|| async { Err(CacheError::internal("boom")) })
            .await;
        assert_eq!(guard.state(), CircuitState::Open);

        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: CacheResult<()> = guard
            .call(move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 0, "short-circuited call must not invoke the operation");
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let config = FailureGuardConfig {
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1),
            ..FailureGuardConfig::default()
        };
        let guard = FailureGuard::new("test", config);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();
        let result: CacheResult<u32> = guard
            .call(move || {
                let attempts = attempts_clone.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::Relaxed);
                    if n < 2 {
                        Err(CacheError::internal("transient"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
    }
}
