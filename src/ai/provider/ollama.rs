//! Ollama Local Engine
//!
//! Completion engine for locally-running Ollama models. Streaming responses
//! are newline-delimited JSON objects, the last one carrying `"done": true`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChunkStream, CompletionEngine, ErrorClassifier, LineEvent, spawn_line_stream};
use crate::config::LlmConfig;
use crate::types::{ErrorCategory, LlmError, Result, VerigenError};

const DEFAULT_API_BASE: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "qwen2.5-coder:latest";
const PROVIDER: &str = "ollama";

pub struct OllamaEngine {
    api_base: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OllamaEngine {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_base = config
            .api_base
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let api_base = Self::validate_endpoint(&api_base)?;

        let model = if config.model.is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.model
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VerigenError::LlmApi(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_base,
            model,
            temperature: config.temperature,
            client,
        })
    }

    /// Validate endpoint URL (SSRF prevention)
    ///
    /// Only allows http/https schemes and warns for non-localhost endpoints.
    fn validate_endpoint(endpoint: &str) -> Result<String> {
        let url = url::Url::parse(endpoint).map_err(|e| {
            VerigenError::Config(format!("Invalid Ollama endpoint URL '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(VerigenError::Config(format!(
                "Ollama endpoint must use http or https scheme, got: {}",
                url.scheme()
            )));
        }

        if let Some(host) = url.host_str()
            && !matches!(host, "localhost" | "127.0.0.1" | "[::1]")
        {
            warn!(
                "Ollama endpoint is not localhost: {}. Ensure this is intentional.",
                host
            );
        }

        let mut result = url.to_string();
        if result.ends_with('/') {
            result.pop();
        }
        Ok(result)
    }

    fn build_request(&self, system: &str, user: &str, max_tokens: usize, stream: bool) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            system: system.to_string(),
            prompt: user.to_string(),
            stream,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: max_tokens,
            },
        }
    }

    async fn send(&self, request: &OllamaRequest) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.api_base);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    VerigenError::Llm(LlmError::with_provider(
                        ErrorCategory::Unavailable,
                        format!(
                            "Failed to connect to Ollama at {}. Is Ollama running? Start with: ollama serve",
                            self.api_base
                        ),
                        PROVIDER,
                    ))
                } else {
                    VerigenError::Llm(ErrorClassifier::classify(
                        &format!("Ollama request failed: {}", e),
                        PROVIDER,
                    ))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("Ollama API error ({}): {}", status, body),
                PROVIDER,
            )
            .into());
        }

        Ok(response)
    }
}

/// Parse one NDJSON line of a streaming generate call
fn parse_ndjson_line(line: &str) -> LineEvent {
    if line.is_empty() {
        return LineEvent::Skip;
    }
    match serde_json::from_str::<OllamaResponse>(line) {
        Ok(chunk) if chunk.error.is_some() => {
            LineEvent::Error(chunk.error.unwrap_or_default())
        }
        Ok(chunk) if chunk.done && chunk.response.is_empty() => LineEvent::Done,
        Ok(chunk) if chunk.response.is_empty() => LineEvent::Skip,
        Ok(chunk) => LineEvent::Chunk(chunk.response),
        Err(e) => LineEvent::Error(format!("Failed to parse Ollama stream line: {}", e)),
    }
}

#[async_trait]
impl CompletionEngine for OllamaEngine {
    async fn generate(&self, system: &str, user: &str, max_tokens: usize) -> Result<String> {
        info!(
            "Generating with Ollama (model: {}, temperature: {})",
            self.model, self.temperature
        );

        let request = self.build_request(system, user, max_tokens, false);
        let response = self.send(&request).await?;

        let body: OllamaResponse = response.json().await.map_err(|e| {
            VerigenError::Llm(ErrorClassifier::classify(
                &format!("Failed to parse Ollama response: {}", e),
                PROVIDER,
            ))
        })?;

        if let Some(error) = body.error {
            return Err(ErrorClassifier::classify(&error, PROVIDER).into());
        }
        Ok(body.response)
    }

    async fn generate_stream(
        &self,
        system: &str,
        user: &str,
        max_tokens: usize,
    ) -> Result<ChunkStream> {
        debug!("Streaming with Ollama (model: {})", self.model);
        let request = self.build_request(system, user, max_tokens, true);
        let response = self.send(&request).await?;
        Ok(spawn_line_stream(response, PROVIDER, parse_ndjson_line))
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    system: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}
