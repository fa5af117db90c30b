/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Signal '{signal}' timed out after {timeout_ms}ms")]
    SignalTimeout { signal: String, timeout_ms: u128 },

    #[error("Signal '{signal}' failed: {message}")]
    SignalCompute { signal: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether this error only affects a single signal for a single query.
    ///
    /// The fusion engine downgrades these to "signal unavailable" instead of
    /// failing the whole request.
    pub fn is_signal_local(&self) -> bool {
        matches!(
            self,
            AppError::SignalTimeout { .. } | AppError::SignalCompute { .. }
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_errors_are_signal_local() {
        let timeout = AppError::SignalTimeout {
            signal: "embedding".to_string(),
            timeout_ms: 250,
        };
        let compute = AppError::SignalCompute {
            signal: "tags".to_string(),
            message: "boom".to_string(),
        };
        assert!(timeout.is_signal_local());
        assert!(compute.is_signal_local());
        assert!(!AppError::Persistence("corrupt".to_string()).is_signal_local());
    }

    #[test]
    fn test_error_display_includes_context() {
        let err = AppError::SignalTimeout {
            signal: "embedding".to_string(),
            timeout_ms: 250,
        };
        assert_eq!(err.to_string(), "Signal 'embedding' timed out after 250ms");
    }
}
