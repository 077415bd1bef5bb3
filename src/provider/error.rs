//! Error types for upstream provider operations.

use thiserror::Error;

/// Errors that can occur while calling the upstream backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Network connectivity error (DNS, connection refused, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// Single HTTP request exceeded its deadline.
    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    /// Backend returned an error response (4xx, 5xx).
    #[error("Upstream error {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Upstream integrity or attestation failure. Fatal; never retried.
    #[error("Verification failed: {0}")]
    Unauthorized(String),

    /// Backend response doesn't match the expected format.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Provider configuration error (missing key, bad URL).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation not supported by this backend.
    #[error("Operation '{0}' not supported by this backend")]
    Unsupported(&'static str),
}

impl ProviderError {
    /// Whether this failure is transient and safe to retry automatically.
    ///
    /// Only explicit transient codes qualify: resource exhaustion (429) and
    /// service unavailability (503). Auth and validation failures are fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Upstream {
                status: 429 | 503,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exhaustion_and_unavailable_are_retryable() {
        assert!(ProviderError::Upstream {
            status: 429,
            message: "quota".into()
        }
        .is_retryable());
        assert!(ProviderError::Upstream {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());

        assert!(!ProviderError::Upstream {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!ProviderError::Unauthorized("app check".into()).is_retryable());
        assert!(!ProviderError::Network("refused".into()).is_retryable());
        assert!(!ProviderError::Timeout(5_000).is_retryable());
    }
}
