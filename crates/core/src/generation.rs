use crate::error::GenerationError;
use crate::traits::{GenerationParams, TextGenerator};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_COHERE_ENDPOINT: &str = "https://api.cohere.ai/v1/generate";
pub const DEFAULT_COHERE_MODEL: &str = "command-r-plus";
const BACKEND: &str = "cohere";

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_COHERE_ENDPOINT.to_string(),
            model: DEFAULT_COHERE_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    generations: Vec<Generation>,
}

#[derive(Debug, Deserialize)]
struct Generation {
    #[serde(default)]
    text: String,
}

/// Client for Cohere's `generate` endpoint. The credential is checked per call, so a missing
/// key surfaces as `MissingCredential` on the first question rather than at startup.
pub struct CohereGenerator {
    config: GenerationConfig,
    client: Client,
}

impl CohereGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .user_agent(concat!("doc-qa/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, client })
    }

    fn api_key(&self) -> Result<&str, GenerationError> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(GenerationError::MissingCredential)
    }

    async fn send(&self, api_key: &str, body: &GenerateRequest<'_>) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|error| self.classify(error))?;

        let status = response.status();
        if !status.is_success() {
            let details = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {details}"),
            });
        }

        let payload: GenerateResponse = response.json().await.map_err(|error| self.classify(error))?;
        first_generation_text(payload)
    }

    fn classify(&self, error: reqwest::Error) -> GenerationError {
        if error.is_timeout() {
            GenerationError::Timeout(self.config.timeout.as_secs())
        } else {
            GenerationError::Http(error)
        }
    }
}

#[async_trait]
impl TextGenerator for CohereGenerator {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn generate(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, GenerationError> {
        let api_key = self.api_key()?;
        let body = GenerateRequest {
            model: &self.config.model,
            prompt,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        debug!(model = %self.config.model, prompt_chars = prompt.len(), "calling generation model");
        tokio::time::timeout(self.config.timeout, self.send(api_key, &body))
            .await
            .map_err(|_| GenerationError::Timeout(self.config.timeout.as_secs()))?
    }
}

fn first_generation_text(payload: GenerateResponse) -> Result<String, GenerationError> {
    payload
        .generations
        .into_iter()
        .next()
        .map(|generation| generation.text.trim().to_string())
        .ok_or_else(|| GenerationError::EmptyResponse(BACKEND.to_string()))
}
