//! Error types for gateway-core.
//!
//! Every variant maps to one of the stable `error_code` values the gateway
//! contract promises callers (see the error envelope in the inbound API).
//! Node-level failures are captured into `NodeResult::error` and never cross
//! a node boundary as a panic or bare `Result::Err` escaping the runtime.

use thiserror::Error;

/// Result type alias using gateway-core's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error codes exposed on the error envelope and in the health report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    RateLimited,
    BudgetExhausted,
    Timeout,
    UpstreamUnavailable,
    EmptyGeneration,
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidRequest => "invalid_request",
            Self::RateLimited => "rate_limited",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Timeout => "timeout",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::EmptyGeneration => "empty_generation",
            Self::InternalError => "internal_error",
        };
        write!(f, "{s}")
    }
}

/// Errors that can occur during gateway orchestration.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input; no budget spent, not retryable.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Admission refused by the per-user rate limiter.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Within-request cost budget was consumed before completion.
    #[error("budget exhausted: {resource}")]
    BudgetExhausted { resource: String },

    /// Global or per-node deadline expired.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A backend or provider failed its health check or transport call.
    #[error("upstream unavailable: {upstream} - {message}")]
    UpstreamUnavailable { upstream: String, message: String },

    /// The model backend returned success with empty generated text.
    #[error("model {model} returned an empty generation")]
    EmptyGeneration { model: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Uncategorized internal error; always logged with a correlation id.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The stable error code for this error, used on the error envelope.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::BudgetExhausted { .. } => ErrorCode::BudgetExhausted,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::UpstreamUnavailable { .. } => ErrorCode::UpstreamUnavailable,
            Self::EmptyGeneration { .. } => ErrorCode::EmptyGeneration,
            Self::Serialization(_) | Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    pub fn budget_exhausted(resource: impl Into<String>) -> Self {
        Self::BudgetExhausted {
            resource: resource.into(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn upstream_unavailable(upstream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            upstream: upstream.into(),
            message: message.into(),
        }
    }

    pub fn empty_generation(model: impl Into<String>) -> Self {
        Self::EmptyGeneration {
            model: model.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether retrying the same call might succeed (transport/backend
    /// transients only — never for malformed requests).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::UpstreamUnavailable { .. } | Self::EmptyGeneration { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(Error::invalid_request("bad").code(), ErrorCode::InvalidRequest);
        assert_eq!(Error::rate_limited(5).code(), ErrorCode::RateLimited);
        assert_eq!(
            Error::budget_exhausted("chat").code(),
            ErrorCode::BudgetExhausted
        );
        assert_eq!(Error::timeout(30_000).code(), ErrorCode::Timeout);
        assert_eq!(
            Error::upstream_unavailable("backend", "down").code(),
            ErrorCode::UpstreamUnavailable
        );
        assert_eq!(
            Error::empty_generation("llama3").code(),
            ErrorCode::EmptyGeneration
        );
        assert_eq!(Error::internal("oops").code(), ErrorCode::InternalError);
    }

    #[test]
    fn retry_classification_matches_policy() {
        assert!(Error::timeout(1).is_retryable());
        assert!(Error::upstream_unavailable("x", "y").is_retryable());
        assert!(Error::empty_generation("m").is_retryable());
        assert!(!Error::invalid_request("bad").is_retryable());
        assert!(!Error::budget_exhausted("chat").is_retryable());
    }

    #[test]
    fn error_code_display_matches_wire_format() {
        assert_eq!(ErrorCode::InvalidRequest.to_string(), "invalid_request");
        assert_eq!(ErrorCode::EmptyGeneration.to_string(), "empty_generation");
    }
}
