//! Client error types.

/// Errors that can occur when using the credit engine client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response with no more specific mapping.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The balance does not cover the request.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// A trial debit overflowed the daily cap and the service rejects overflow.
    #[error("daily cap exceeded: remaining={remaining}, required={required}")]
    DailyCapExceeded {
        /// Credits left today.
        remaining: i64,
        /// Required amount.
        required: i64,
    },

    /// The service ran out of write attempts under contention. Safe to retry.
    #[error("concurrency conflict after {attempts} attempts")]
    ConcurrencyConflict {
        /// Attempts made by the service.
        attempts: u32,
    },

    /// Account, hold or operation not found.
    #[error("not found: {message}")]
    NotFound {
        /// Error code (`account_not_found`, `hold_not_found`, `not_found`).
        code: String,
        /// Error message.
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether repeating the same request may succeed.
    ///
    /// Reserve with a caller-chosen hold id and keyed balance changes are
    /// idempotent, so retrying them never double-applies.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
