//! HTTP client for the Gemini generative-language API, behind the [`Answerer`] trait.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{self, Config, ConfigError};
use crate::messages::{ApiErrorResponse, GenerateRequest, GenerateResponse, ModelListResponse};

/// Failure of the external answer service. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    /// Connection failed, DNS, TLS, timeout.
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("service error: {0}")]
    Server(String),

    #[error("question was blocked by the service ({0})")]
    Blocked(String),

    #[error("malformed response: {0}")]
    InvalidResponse(String),

    #[error("unexpected response: {0}")]
    Unknown(String),
}

impl GenerateError {
    /// Classify a non-success HTTP response by status code and body.
    pub fn from_http_status(status: u16, body: &str) -> Self {
        if let Ok(envelope) = serde_json::from_str::<ApiErrorResponse>(body) {
            let err = envelope.error;
            if err.reason() == Some("API_KEY_INVALID") {
                return GenerateError::Authentication(err.message);
            }
            return match err.status.as_deref() {
                Some("UNAUTHENTICATED") | Some("PERMISSION_DENIED") => {
                    GenerateError::Authentication(err.message)
                }
                Some("RESOURCE_EXHAUSTED") => GenerateError::RateLimited(err.message),
                Some("NOT_FOUND") => GenerateError::ModelNotFound(err.message),
                _ => Self::from_status_only(status, err.message),
            };
        }
        Self::from_status_only(status, body.to_string())
    }

    fn from_status_only(status: u16, message: String) -> Self {
        match status {
            401 | 403 => GenerateError::Authentication(message),
            429 => GenerateError::RateLimited(message),
            400 => GenerateError::InvalidRequest(message),
            404 => GenerateError::ModelNotFound(message),
            500..=599 => GenerateError::Server(message),
            _ => GenerateError::Unknown(format!("HTTP {}: {}", status, message)),
        }
    }

    /// Whether resubmitting the same question later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenerateError::Network(_) | GenerateError::RateLimited(_) | GenerateError::Server(_)
        )
    }
}

impl From<reqwest::Error> for GenerateError {
    fn from(e: reqwest::Error) -> Self {
        // The request URL carries the API key.
        let e = e.without_url();
        if e.is_decode() {
            GenerateError::InvalidResponse(e.to_string())
        } else {
            GenerateError::Network(e.to_string())
        }
    }
}

/// Result of a service reachability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub model: String,
    /// `Some(false)` when the listing was fetched and the model is not in it.
    pub model_available: Option<bool>,
    pub models_listed: usize,
}

/// Produces an answer for a question. Implemented by the live HTTP client and by test doubles.
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn generate(&self, question: &str) -> Result<String, GenerateError>;

    async fn check(&self) -> Result<ServiceStatus, GenerateError> {
        Ok(ServiceStatus {
            model: String::new(),
            model_available: None,
            models_listed: 0,
        })
    }
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
    system_prompt: Option<String>,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, GenerateError> {
        Ok(Self {
            http: build_http(Duration::from_secs(config::DEFAULT_TIMEOUT_SECS))?,
            api_key: api_key.into(),
            model: model.into(),
            base_url: config::DEFAULT_BASE_URL.to_string(),
            system_prompt: None,
        })
    }

    /// Build from config. Fails with [`ConfigError::MissingApiKey`] when no credential is set.
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let api_key = cfg.api_key()?;
        let timeout = cfg.timeout()?;
        let client = Self::new(api_key, cfg.model())
            .and_then(|c| c.with_timeout(timeout))
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(client
            .with_base_url(cfg.base_url())
            .with_system_prompt(cfg.system_prompt()))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, GenerateError> {
        self.http = build_http(timeout)?;
        Ok(self)
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn generate_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    async fn error_from(response: reqwest::Response) -> GenerateError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!("Answer service returned {}", status);
        GenerateError::from_http_status(status.as_u16(), &body)
    }
}

fn build_http(timeout: Duration) -> Result<Client, GenerateError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GenerateError::Network(format!("failed to create HTTP client: {}", e)))
}

#[async_trait]
impl Answerer for GeminiClient {
    async fn generate(&self, question: &str) -> Result<String, GenerateError> {
        let request = GenerateRequest::new(question, self.system_prompt.as_deref());
        debug!("POST {} (model {})", self.generate_url(), self.model);

        let response = self
            .http
            .post(self.generate_url())
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body = response.text().await?;
        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| GenerateError::InvalidResponse(e.to_string()))?;
        if let Some(reason) = parsed.block_reason() {
            return Err(GenerateError::Blocked(reason.to_string()));
        }
        parsed
            .text()
            .ok_or_else(|| GenerateError::InvalidResponse("no answer text in response".into()))
    }

    /// Lists models and reports whether the configured one is served.
    async fn check(&self) -> Result<ServiceStatus, GenerateError> {
        let response = self
            .http
            .get(self.models_url())
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let listing: ModelListResponse = response.json().await?;
        let available = listing
            .models
            .iter()
            .any(|m| m.short_name() == self.model);
        Ok(ServiceStatus {
            model: self.model.clone(),
            model_available: Some(available),
            models_listed: listing.models.len(),
        })
    }
}
