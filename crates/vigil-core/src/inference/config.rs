//! Inference endpoint configuration.

use std::time::Duration;

use crate::error::ConfigError;

/// Default local inference endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:11434";

/// Default model name.
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Default sampling temperature. Kept low to minimise reply variance.
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Bounded retry policy for one inference operation.
///
/// With an independent per-attempt success probability `p`, `n` attempts
/// succeed with probability `1 - (1 - p)^n`; at `p ≈ 0.8`, three attempts
/// give ≈ 0.992.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Probability that at least one of the attempts succeeds.
    pub fn success_probability(&self, per_attempt: f64) -> f64 {
        let p = per_attempt.clamp(0.0, 1.0);
        1.0 - (1.0 - p).powi(self.max_attempts as i32)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// Configuration for [`InferenceClient`](super::InferenceClient).
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// Base URL of the inference service.
    pub endpoint: String,
    /// Model to ask.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Retry policy.
    pub retry: RetryPolicy,
    /// Per-request timeout. `None` keeps the HTTP client's default.
    pub request_timeout: Option<Duration>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            retry: RetryPolicy::default(),
            request_timeout: None,
        }
    }
}

impl InferenceConfig {
    /// Sets the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets a per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Endpoint without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    /// Checks the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.endpoint.trim();
        let has_scheme = endpoint.starts_with("http://") || endpoint.starts_with("https://");
        let has_host = endpoint
            .split_once("://")
            .map(|(_, rest)| !rest.trim_matches('/').is_empty())
            .unwrap_or(false);
        if !has_scheme || !has_host {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }

        if self.model.trim().is_empty() || self.model.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }

        Ok(())
    }
}
