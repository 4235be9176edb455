//! HTTP client for the local inference endpoint.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::config::InferenceConfig;
use super::{prompt, reply};
use crate::analysis::AnalysisResult;
use crate::error::{ConfigError, InferenceError, Result};
use crate::rules::Rule;

/// Body of `POST /api/generate`.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    temperature: f32,
    options: GenerateOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<&'a [String]>,
}

/// Ollama reads sampling parameters from `options`.
#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for rule parsing, content analysis and host categorization.
///
/// Every operation runs request, extraction and validation inside the
/// configured [`RetryPolicy`](super::RetryPolicy). A validation failure
/// consumes an attempt exactly like a transport failure. Once attempts run
/// out the caller gets [`InferenceError::Exhausted`].
#[derive(Debug, Clone)]
pub struct InferenceClient {
    http: reqwest::Client,
    config: InferenceConfig,
}

impl InferenceClient {
    /// Creates a client after validating `config`.
    pub fn new(config: InferenceConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let mut builder = reqwest::Client::builder()
            .user_agent(format!("Vigil/{}", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// The active configuration.
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Sends one non-streaming generation request and returns the raw text.
    pub async fn generate(&self, prompt: &str, images: Option<&[String]>) -> Result<String> {
        let url = format!("{}/api/generate", self.config.base_url());
        let body = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            temperature: self.config.temperature,
            options: GenerateOptions {
                temperature: self.config.temperature,
            },
            images,
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let reply: GenerateResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Transport(format!("unreadable reply body: {e}")))?;

        Ok(reply.response)
    }

    /// Runs `prompt` through the retry loop, validating each reply.
    pub async fn query<T, F>(
        &self,
        operation: &'static str,
        prompt: &str,
        images: Option<&[String]>,
        validate: F,
    ) -> Result<T>
    where
        F: Fn(&str) -> Result<T>,
    {
        let policy = self.config.retry;
        let mut last = InferenceError::Transport("no attempt made".to_string());

        for attempt in 1..=policy.max_attempts {
            let outcome = match self.generate(prompt, images).await {
                Ok(text) => validate(&text),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Inference succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts = policy.max_attempts,
                        error = %err,
                        "Inference attempt failed"
                    );
                    last = err;
                }
            }

            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.delay).await;
            }
        }

        warn!(
            operation,
            attempts = policy.max_attempts,
            "Inference retries exhausted"
        );
        Err(InferenceError::Exhausted {
            attempts: policy.max_attempts,
            last: Box::new(last),
        })
    }

    /// Turns a parent's free-text rule into a structured, active [`Rule`].
    pub async fn parse_rule(&self, text: &str) -> Result<Rule> {
        let text = text.trim();
        if text.is_empty() {
            return Err(InferenceError::Validation("rule text is empty".to_string()));
        }

        let prompt = prompt::parse_rule_prompt(text);
        self.query("parse_rule", &prompt, None, |reply| {
            reply::parse_rule(reply, text)
        })
        .await
    }

    /// Asks whether `content` violates any of `rules`.
    pub async fn analyze_content(&self, content: &str, rules: &[Rule]) -> Result<AnalysisResult> {
        let prompt = prompt::analyze_content_prompt(content, rules);
        self.query("analyze_content", &prompt, None, reply::parse_analysis)
            .await
    }

    /// Asks whether an image violates any of `rules`.
    pub async fn analyze_image(&self, bytes: &[u8], rules: &[Rule]) -> Result<AnalysisResult> {
        let images = [STANDARD.encode(bytes)];
        let prompt = prompt::analyze_image_prompt(rules);
        self.query("analyze_image", &prompt, Some(images.as_slice()), reply::parse_analysis)
            .await
    }

    /// Asks for the content categories of a website.
    pub async fn categorize_host(&self, hostname: &str) -> Result<Vec<String>> {
        let prompt = prompt::categorize_prompt(hostname);
        self.query("categorize", &prompt, None, reply::parse_categories)
            .await
    }

    /// Returns true if the endpoint answers `GET /api/tags`.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url());
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Inference endpoint unavailable");
                false
            }
        }
    }
}
