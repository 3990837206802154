use thiserror::Error;

/// Errors surfaced to the caller of a relay operation.
///
/// Every variant carries a human-readable message; callers convert these into a
/// single user-facing notification. Nothing is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Missing input: {0}")]
    InputMissing(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Only ever logged; identity generation falls back instead of failing.
    #[error("Random source unavailable: {0}")]
    RandomSourceUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Short machine-friendly code, used as a metrics label
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::PermissionDenied(_) => "permission_denied",
            RelayError::InputMissing(_) => "input_missing",
            RelayError::InvalidInput(_) => "invalid_input",
            RelayError::TransportFailure(_) => "transport_failure",
            RelayError::RandomSourceUnavailable(_) => "random_source_unavailable",
            RelayError::Config(_) => "config",
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        let err = RelayError::TransportFailure("upload timed out".to_string());
        assert_eq!(err.to_string(), "Transport failure: upload timed out");
        assert_eq!(err.code(), "transport_failure");
    }
}
