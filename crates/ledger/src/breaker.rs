//! Circuit breaker guarding ledger round trips.
//!
//! During a sustained ledger outage every consent check would otherwise wait
//! out its full timeout before failing closed. The breaker counts
//! consecutive unavailability failures, opens to reject calls without I/O,
//! and after a cool-down lets probe calls through to detect recovery.
//!
//! ```text
//! Closed ──failure_threshold──→ Open ──recovery_timeout──→ HalfOpen
//!    ↑                            ↑                           │
//!    │                            └──────probe fails──────────┤
//!    └────────────────success_threshold probes succeed────────┘
//! ```

use std::{fmt, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::ConfigError;

/// Default consecutive failures before the circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default cool-down before an open circuit admits probes.
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default successful probes needed to close a half-open circuit.
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the given instant.
    Open {
        /// When probes may resume.
        until: Instant,
    },
    /// Probe calls pass through.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open { .. } => f.write_str("open"),
            Self::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    failure_threshold: u32,
    #[serde(with = "humantime_serde", default = "default_recovery_timeout")]
    recovery_timeout: Duration,
    #[serde(default = "default_success_threshold")]
    success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_recovery_timeout() -> Duration {
    DEFAULT_RECOVERY_TIMEOUT
}

fn default_success_threshold() -> u32 {
    DEFAULT_SUCCESS_THRESHOLD
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
        }
    }
}

#[bon::bon]
impl CircuitBreakerConfig {
    /// Creates a validated breaker configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either threshold is zero or the recovery
    /// timeout is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_FAILURE_THRESHOLD)] failure_threshold: u32,
        #[builder(default = DEFAULT_RECOVERY_TIMEOUT)] recovery_timeout: Duration,
        #[builder(default = DEFAULT_SUCCESS_THRESHOLD)] success_threshold: u32,
    ) -> Result<Self, ConfigError> {
        let config = Self { failure_threshold, recovery_timeout, success_threshold };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks invariants, for configurations that arrived via serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "failure_threshold",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "recovery_timeout",
                value: "0s".into(),
            });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "success_threshold",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Returns the failure threshold.
    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Returns the recovery timeout.
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Returns the half-open success threshold.
    #[must_use]
    pub fn success_threshold(&self) -> u32 {
        self.success_threshold
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    probe_successes: u32,
    fast_failures: u64,
}

/// Thread-safe circuit breaker. Critical sections never perform I/O.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                probe_successes: 0,
                fast_failures: 0,
            }),
        }
    }

    /// Returns `true` if a call may proceed.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open { until } if Instant::now() >= until => {
                inner.state = CircuitState::HalfOpen;
                inner.probe_successes = 0;
                tracing::info!(new_state = "half_open", "ledger circuit breaker admitting probes");
                true
            },
            CircuitState::Open { .. } => {
                inner.fast_failures += 1;
                false
            },
        }
    }

    /// Records a call that reached the ledger.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => inner.failures = 0,
            CircuitState::HalfOpen => {
                inner.probe_successes += 1;
                if inner.probe_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failures = 0;
                    tracing::info!(new_state = "closed", "ledger circuit breaker closed");
                }
            },
            CircuitState::Open { .. } => {},
        }
    }

    /// Records a call that failed because the ledger was unavailable.
    ///
    /// Failures that say nothing about ledger health (unbound contract,
    /// missing identity, encoding) must not be recorded.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failures += 1;
                if inner.failures >= self.config.failure_threshold {
                    inner.state =
                        CircuitState::Open { until: Instant::now() + self.config.recovery_timeout };
                    tracing::warn!(
                        consecutive_failures = inner.failures,
                        recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                        "ledger circuit breaker opened",
                    );
                }
            },
            CircuitState::HalfOpen => {
                inner.state =
                    CircuitState::Open { until: Instant::now() + self.config.recovery_timeout };
                inner.probe_successes = 0;
                tracing::warn!(new_state = "open", "ledger circuit breaker probe failed");
            },
            CircuitState::Open { .. } => {},
        }
    }

    /// Returns the current state. An expired open state reads as half-open.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match self.inner.lock().state {
            CircuitState::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            other => other,
        }
    }

    /// Returns how many calls were rejected without I/O.
    #[must_use]
    pub fn fast_failures(&self) -> u64 {
        self.inner.lock().fast_failures
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn breaker(failures: u32, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::builder()
                .failure_threshold(failures)
                .success_threshold(successes)
                .recovery_timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
        )
    }

    #[rstest]
    #[case::zero_failures(0, Duration::from_secs(1), 1, "failure_threshold")]
    #[case::zero_timeout(1, Duration::ZERO, 1, "recovery_timeout")]
    #[case::zero_successes(1, Duration::from_secs(1), 0, "success_threshold")]
    fn invalid_configs(
        #[case] failure_threshold: u32,
        #[case] recovery_timeout: Duration,
        #[case] success_threshold: u32,
        #[case] field: &str,
    ) {
        let err = CircuitBreakerConfig::builder()
            .failure_threshold(failure_threshold)
            .recovery_timeout(recovery_timeout)
            .success_threshold(success_threshold)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains(field), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_fails_fast() {
        let breaker = breaker(3, 1);
        for _ in 0..2 {
            breaker.record_failure();
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        breaker.record_failure();
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
        assert!(!breaker.allow_request());
        assert!(!breaker.allow_request());
        assert_eq!(breaker.fast_failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_streak() {
        let breaker = breaker(2, 1);
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_closes_after_successful_probes() {
        let breaker = breaker(1, 2);
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let breaker = breaker(1, 1);
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert!(!breaker.allow_request());
    }

    #[test]
    fn deserializes_humantime_durations() {
        let config: CircuitBreakerConfig =
            serde_json::from_str(r#"{"failure_threshold": 3, "recovery_timeout": "1m 30s"}"#)
                .unwrap();
        assert_eq!(config.recovery_timeout(), Duration::from_secs(90));
        assert_eq!(config.success_threshold(), DEFAULT_SUCCESS_THRESHOLD);
        assert!(config.validate().is_ok());
    }
}
