//! Error types for classification and configuration.

use thiserror::Error;

/// Errors from the inference endpoint.
///
/// `Transport`, `Status` and `Validation` are per-attempt failures and are
/// retried. Callers see `Exhausted` once the retry budget is spent, never a
/// guessed value.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Endpoint unreachable, connection reset, unreadable body.
    #[error("transport error: {0}")]
    Transport(String),

    /// Endpoint answered with a non-success HTTP status.
    #[error("inference endpoint returned HTTP {0}")]
    Status(u16),

    /// Well-formed HTTP, but the embedded JSON failed validation.
    #[error("invalid model reply: {0}")]
    Validation(String),

    /// All attempts failed; carries the last failure.
    #[error("inference failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The failure from the final attempt.
        last: Box<InferenceError>,
    },
}

impl InferenceError {
    /// Returns true for failures that come from the model's text rather
    /// than from the transport.
    pub fn is_validation(&self) -> bool {
        match self {
            InferenceError::Validation(_) => true,
            InferenceError::Exhausted { last, .. } => last.is_validation(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => InferenceError::Status(status.as_u16()),
            None => InferenceError::Transport(err.to_string()),
        }
    }
}

/// Invalid startup configuration. Always fatal.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Endpoint is not an http(s) URL.
    #[error("invalid inference endpoint: {0}")]
    InvalidEndpoint(String),

    /// Model name is empty or contains whitespace.
    #[error("invalid model name: {0:?}")]
    InvalidModel(String),

    /// Sampling temperature outside 0.0..=2.0.
    #[error("temperature must be between 0.0 and 2.0, got {0}")]
    InvalidTemperature(f32),

    /// Retry policy must allow at least one attempt.
    #[error("retry policy must allow at least one attempt")]
    NoAttempts,

    /// Listener port is not usable.
    #[error("invalid port: {0}")]
    InvalidPort(u16),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Result type for inference operations.
pub type Result<T> = std::result::Result<T, InferenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_reports_validation_origin() {
        let err = InferenceError::Exhausted {
            attempts: 3,
            last: Box::new(InferenceError::Validation("missing severity".into())),
        };
        assert!(err.is_validation());
        assert!(err.to_string().contains("after 3 attempts"));
    }

    #[test]
    fn transport_is_not_validation() {
        let err = InferenceError::Transport("connection refused".into());
        assert!(!err.is_validation());
    }
}
