//! Transport errors for completion calls.
//!
//! Only the completer's own HTTP round-trip is retried here; verification
//! retries are a separate budget owned by the orchestrator.

use std::time::Duration;

/// Longest pause between two transport retries.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Failure of one chat-completion round-trip.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("rate limited (HTTP 429): {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("upstream error (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl LlmError {
    /// Map a non-success HTTP status. `retry_after` is kept for 429 only.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::RateLimited {
                message,
                retry_after,
            },
            400..=499 => Self::Rejected { status, message },
            _ => Self::Upstream { status, message },
        }
    }

    /// Worth another round-trip: rate limits, 5xx and connection trouble.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Upstream { .. } | Self::Network(_)
        )
    }

    /// Pause before retry number `attempt` (0-based).
    ///
    /// A server-supplied `Retry-After` wins; otherwise doubling from a
    /// per-variant base.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = match self {
            Self::RateLimited {
                retry_after: Some(after),
                ..
            } => return *after,
            Self::RateLimited { .. } => Duration::from_secs(4),
            _ => Duration::from_secs(1),
        };
        base.saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }
}

/// Transport retry policy for one completion call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Wall-clock cap across all retries of one call
    pub max_retry_duration: Duration,
    pub retry_rate_limits: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_retry_duration: Duration::from_secs(60),
            retry_rate_limits: true,
        }
    }
}

impl RetryConfig {
    pub fn should_retry(&self, error: &LlmError) -> bool {
        match error {
            LlmError::RateLimited { .. } => self.retry_rate_limits,
            other => other.is_transient(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            LlmError::from_status(429, "slow down".into(), None),
            LlmError::RateLimited { .. }
        ));
        assert!(matches!(
            LlmError::from_status(401, "bad key".into(), Some(Duration::from_secs(5))),
            LlmError::Rejected { status: 401, .. }
        ));
        assert!(matches!(
            LlmError::from_status(503, "overloaded".into(), None),
            LlmError::Upstream { status: 503, .. }
        ));
    }

    #[test]
    fn rejected_and_malformed_are_final() {
        let config = RetryConfig::default();
        assert!(!config.should_retry(&LlmError::from_status(400, "bad".into(), None)));
        assert!(!config.should_retry(&LlmError::Malformed("no choices".into())));
        assert!(config.should_retry(&LlmError::Network("reset".into())));
        assert!(config.should_retry(&LlmError::from_status(502, "gw".into(), None)));
    }

    #[test]
    fn rate_limits_can_be_excluded() {
        let config = RetryConfig {
            retry_rate_limits: false,
            ..RetryConfig::default()
        };
        assert!(!config.should_retry(&LlmError::from_status(429, "x".into(), None)));
    }

    #[test]
    fn retry_after_overrides_backoff() {
        let error = LlmError::from_status(429, "x".into(), Some(Duration::from_secs(9)));
        assert_eq!(error.backoff(0), Duration::from_secs(9));
        assert_eq!(error.backoff(5), Duration::from_secs(9));
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let error = LlmError::Network("timeout".into());
        assert_eq!(error.backoff(0), Duration::from_secs(1));
        assert_eq!(error.backoff(2), Duration::from_secs(4));
        assert_eq!(error.backoff(20), MAX_BACKOFF);
    }
}
