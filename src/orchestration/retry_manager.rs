//! # Retry Manager
//!
//! Single place of retry policy for reaction executions. Classifies handler
//! failures and either schedules another attempt with exponential backoff or
//! declares the failure terminal.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌─────────────────────────┐
//! │ HandlerError │────▶│  classify()  │────▶│ RetryAfter | Terminal   │
//! │ + attempt    │     │  backoff()   │     │ (with ErrorDetail)      │
//! └──────────────┘     └──────────────┘     └─────────────────────────┘
//! ```

use crate::config::RetryConfig;
use crate::constants::MIN_RETRY_DELAY_SECS;
use crate::handlers::{HandlerError, HandlerErrorKind};
use crate::models::ErrorDetail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Message fragments that mark an otherwise unclassified failure as permanent
const PERMANENT_MARKERS: &[&str] = &[
    "authentication",
    "authorization",
    "invalid credentials",
    "access denied",
    "forbidden",
    "validation",
    "invalid request",
    "bad request",
    "not found",
    "does not exist",
];

/// Primary error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Will never succeed if retried
    Permanent,
    /// Reaction setup is wrong; requires user intervention
    Configuration,
    /// May succeed on retry
    Transient,
    Timeout,
    RateLimit,
    Network,
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent | Self::Configuration)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent => write!(f, "Permanent"),
            Self::Configuration => write!(f, "Configuration"),
            Self::Transient => write!(f, "Transient"),
            Self::Timeout => write!(f, "Timeout"),
            Self::RateLimit => write!(f, "Rate Limit"),
            Self::Network => write!(f, "Network"),
        }
    }
}

/// Why no further attempt will be made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    NonRetryable,
    AttemptsExhausted,
    DeadlineExceeded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    RetryAfter { delay: Duration, detail: ErrorDetail },
    Terminal { reason: TerminalReason, detail: ErrorDetail },
}

impl RetryDecision {
    pub fn detail(&self) -> &ErrorDetail {
        match self {
            Self::RetryAfter { detail, .. } | Self::Terminal { detail, .. } => detail,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RetryManager {
    config: RetryConfig,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryManager {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Classify a handler failure
    pub fn classify(&self, error: &HandlerError) -> ErrorCategory {
        match error.kind {
            HandlerErrorKind::InvalidConfiguration | HandlerErrorKind::Unsupported => {
                ErrorCategory::Configuration
            }
            HandlerErrorKind::Unauthorized
            | HandlerErrorKind::NotFound
            | HandlerErrorKind::InvalidInput => ErrorCategory::Permanent,
            HandlerErrorKind::RateLimited => ErrorCategory::RateLimit,
            HandlerErrorKind::Network => ErrorCategory::Network,
            HandlerErrorKind::Timeout => ErrorCategory::Timeout,
            HandlerErrorKind::Upstream => ErrorCategory::Transient,
            HandlerErrorKind::Other => {
                let message = error.message.to_ascii_lowercase();
                if PERMANENT_MARKERS.iter().any(|marker| message.contains(marker)) {
                    ErrorCategory::Permanent
                } else {
                    ErrorCategory::Transient
                }
            }
        }
    }

    /// Backoff before the attempt following `attempt` (1-based), jittered.
    ///
    /// Computed in seconds and clamped to `max_delay` before conversion, so
    /// large attempt numbers saturate instead of overflowing.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let max_delay = self.config.max_delay();
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut seconds = self.config.base_delay().as_secs_f64() * self.config.multiplier.powi(exponent);

        if self.config.jitter_factor > 0.0 {
            let jitter = (fastrand::f64() * 2.0 - 1.0) * self.config.jitter_factor;
            seconds *= (1.0 + jitter).max(0.0);
        }

        let floor = if self.config.base_delay() >= Duration::from_secs(MIN_RETRY_DELAY_SECS) {
            MIN_RETRY_DELAY_SECS as f64
        } else {
            0.0
        };

        let clamped = seconds.max(floor).min(max_delay.as_secs_f64());
        Duration::try_from_secs_f64(clamped).unwrap_or(max_delay)
    }

    /// Decide what happens after attempt number `attempt` failed with `error`.
    ///
    /// `elapsed` is the time since the execution was created.
    pub fn decide(
        &self,
        attempt: u32,
        error: &HandlerError,
        elapsed: Duration,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let category = self.classify(error);
        let detail = ErrorDetail {
            category,
            code: error.kind.as_str().to_string(),
            message: error.message.clone(),
            attempt,
            occurred_at: now,
        };

        if !category.is_retryable() {
            return RetryDecision::Terminal {
                reason: TerminalReason::NonRetryable,
                detail,
            };
        }

        if attempt >= self.config.max_attempts {
            return RetryDecision::Terminal {
                reason: TerminalReason::AttemptsExhausted,
                detail,
            };
        }

        let delay = match (category, error.retry_after) {
            (ErrorCategory::RateLimit, Some(requested)) => requested.min(self.config.max_delay()),
            _ => self.backoff(attempt),
        };

        if elapsed + delay > self.config.max_total_elapsed() {
            return RetryDecision::Terminal {
                reason: TerminalReason::DeadlineExceeded,
                detail,
            };
        }

        RetryDecision::RetryAfter { delay, detail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_RETRY_ATTEMPTS;

    fn manager_without_jitter() -> RetryManager {
        RetryManager::new(RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        })
    }

    #[test]
    fn test_classification() {
        let manager = RetryManager::default();

        assert_eq!(
            manager.classify(&HandlerError::invalid_configuration("missing channel")),
            ErrorCategory::Configuration
        );
        assert_eq!(
            manager.classify(&HandlerError::unauthorized("token revoked")),
            ErrorCategory::Permanent
        );
        assert_eq!(
            manager.classify(&HandlerError::network("connection reset")),
            ErrorCategory::Network
        );
        assert_eq!(
            manager.classify(&HandlerError::other("HTTP 403 Forbidden")),
            ErrorCategory::Permanent
        );
        assert_eq!(
            manager.classify(&HandlerError::other("HTTP 502 from upstream")),
            ErrorCategory::Transient
        );
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let manager = manager_without_jitter();

        assert_eq!(manager.backoff(1), Duration::from_secs(5));
        assert_eq!(manager.backoff(2), Duration::from_secs(10));
        assert_eq!(manager.backoff(3), Duration::from_secs(20));
        assert_eq!(manager.backoff(20), Duration::from_secs(300));
    }

    #[test]
    fn test_large_attempt_numbers_saturate_at_max_delay() {
        let manager = RetryManager::new(RetryConfig {
            max_attempts: MAX_RETRY_ATTEMPTS,
            max_total_elapsed_seconds: 10_000_000_000,
            ..RetryConfig::default()
        });

        assert_eq!(manager.backoff(70), Duration::from_secs(300));
        assert_eq!(manager.backoff(u32::MAX), Duration::from_secs(300));

        match manager.decide(70, &HandlerError::network("reset"), Duration::ZERO, Utc::now()) {
            RetryDecision::RetryAfter { delay, .. } => assert_eq!(delay, Duration::from_secs(300)),
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let manager = RetryManager::default();

        for _ in 0..100 {
            let delay = manager.backoff(2);
            assert!(delay >= Duration::from_millis(8_999), "{delay:?}");
            assert!(delay <= Duration::from_millis(11_001), "{delay:?}");
        }
    }

    #[test]
    fn test_non_retryable_is_terminal_on_first_attempt() {
        let manager = RetryManager::default();
        let decision = manager.decide(
            1,
            &HandlerError::not_found("channel does not exist"),
            Duration::ZERO,
            Utc::now(),
        );

        assert!(matches!(
            decision,
            RetryDecision::Terminal {
                reason: TerminalReason::NonRetryable,
                ..
            }
        ));
        assert_eq!(decision.detail().attempt, 1);
        assert_eq!(decision.detail().code, "not_found");
    }

    #[test]
    fn test_attempts_exhausted() {
        let manager = manager_without_jitter();
        let max = manager.config().max_attempts;

        let decision = manager.decide(max, &HandlerError::network("reset"), Duration::ZERO, Utc::now());

        assert!(matches!(
            decision,
            RetryDecision::Terminal {
                reason: TerminalReason::AttemptsExhausted,
                ..
            }
        ));
    }

    #[test]
    fn test_total_elapsed_budget() {
        let manager = manager_without_jitter();

        let decision = manager.decide(
            2,
            &HandlerError::timeout("handler timed out"),
            Duration::from_secs(3595),
            Utc::now(),
        );

        assert!(matches!(
            decision,
            RetryDecision::Terminal {
                reason: TerminalReason::DeadlineExceeded,
                ..
            }
        ));
    }

    #[test]
    fn test_rate_limit_honours_retry_after() {
        let manager = manager_without_jitter();
        let error = HandlerError::rate_limited("slow down", Some(Duration::from_secs(42)));

        match manager.decide(1, &error, Duration::ZERO, Utc::now()) {
            RetryDecision::RetryAfter { delay, detail } => {
                assert_eq!(delay, Duration::from_secs(42));
                assert_eq!(detail.category, ErrorCategory::RateLimit);
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }
}
