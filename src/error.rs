//! Typed error sums for the storage layer and the chat transport.
//!
//! Handlers pattern-match on these kinds instead of inspecting exception
//! strings. Transport errors split into retryable and permanent families;
//! the Notifier owns the retry policy, the Dispatcher owns escalation.

use thiserror::Error;

/// Storage layer failures. Connection loss fails the request with a typed
/// error; the caller decides whether to retry or report.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("postgres: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("pool: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("store config: {0}")]
    Config(String),

    #[error("invalid row: {0}")]
    Invalid(String),

    #[error("schema reset is disabled (set ALLOW_DB_RESET=true)")]
    ResetDisabled,
}

/// Chat transport failures, one variant per policy in the error table.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Rate limited; wait the given seconds before retrying.
    #[error("rate limited, retry after {0}s")]
    RetryAfter(u64),

    /// Rich-text markup rejected by the transport.
    #[error("markup rejected: {0}")]
    ParseMode(String),

    /// Recipient unreachable: chat deleted, bot blocked, never started.
    #[error("recipient unreachable: {0}")]
    Forbidden(String),

    /// Malformed request (other than markup).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Connection-level failure (DNS, timeout, reset).
    #[error("network: {0}")]
    Network(String),

    /// Any other transport-reported error.
    #[error("api error {code}: {message}")]
    Api { code: i64, message: String },
}

impl TransportError {
    /// Permanent errors are never retried; they either surface to the
    /// caller or trigger the admin escalation path.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            TransportError::Forbidden(_) | TransportError::BadRequest(_)
        )
    }

    /// Short stable label used in logs and error-report signatures.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::RetryAfter(_) => "retry_after",
            TransportError::ParseMode(_) => "parse_mode",
            TransportError::Forbidden(_) => "forbidden",
            TransportError::BadRequest(_) => "bad_request",
            TransportError::Network(_) => "network",
            TransportError::Api { .. } => "api",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanence_split() {
        assert!(TransportError::Forbidden("blocked".into()).is_permanent());
        assert!(TransportError::BadRequest("oops".into()).is_permanent());
        assert!(!TransportError::RetryAfter(5).is_permanent());
        assert!(!TransportError::Network("reset".into()).is_permanent());
        assert!(!TransportError::ParseMode("entities".into()).is_permanent());
    }
}
