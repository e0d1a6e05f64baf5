//! Completion Engine Abstraction
//!
//! The pipeline depends only on [`CompletionEngine`]: a one-shot
//! `generate(system, user, max_tokens)` and a streaming variant yielding a
//! finite sequence of text chunks.
//!
//! ## Modules
//!
//! - `offline`: always unavailable; drives the deterministic fallbacks
//! - `openai`: Chat Completions with SSE streaming
//! - `ollama`: local models with NDJSON streaming
//! - `retry`: backoff wrapper for retryable failures

mod offline;
mod ollama;
mod openai;
mod retry;

pub use offline::OfflineEngine;
pub use ollama::OllamaEngine;
pub use openai::OpenAiEngine;
pub use retry::{RetryConfig, RetryingEngine};

// Re-export error types from centralized location
pub use crate::types::{ErrorCategory, ErrorClassifier, LlmError};

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, Stream, StreamExt};
use tracing::debug;

use crate::config::LlmConfig;
use crate::types::{Result, VerigenError};

/// Finite sequence of generated text chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Shared engine type for concurrent runs
pub type SharedEngine = Arc<dyn CompletionEngine + Send + Sync>;

// =============================================================================
// Completion Engine Trait
// =============================================================================

#[async_trait]
pub trait CompletionEngine: Send + Sync {
    /// Complete a prompt into text
    async fn generate(&self, system: &str, user: &str, max_tokens: usize) -> Result<String>;

    /// Complete a prompt as a stream of chunks.
    ///
    /// Default implementation yields the one-shot completion as a single chunk.
    async fn generate_stream(
        &self,
        system: &str,
        user: &str,
        max_tokens: usize,
    ) -> Result<ChunkStream> {
        let text = self.generate(system, user, max_tokens).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }

    /// Engine name for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;
}

/// Create a shared engine from configuration, wrapped in the retry layer
pub fn create_engine(config: &LlmConfig) -> Result<SharedEngine> {
    let engine: SharedEngine = match config.provider.as_str() {
        "offline" => return Ok(Arc::new(OfflineEngine::new())),
        "openai" => Arc::new(OpenAiEngine::new(config.clone())?),
        "ollama" => Arc::new(OllamaEngine::new(config.clone())?),
        other => {
            return Err(VerigenError::Config(format!(
                "Unknown provider: {}. Supported: offline, openai, ollama",
                other
            )));
        }
    };
    Ok(Arc::new(RetryingEngine::new(
        engine,
        RetryConfig::with_max_retries(config.max_retries),
    )))
}

/// Drain a chunk stream into one string
pub async fn collect_stream(mut stream: ChunkStream) -> Result<String> {
    let mut out = String::new();
    while let Some(chunk) = stream.next().await {
        out.push_str(&chunk?);
    }
    Ok(out)
}

// =============================================================================
// Line-Delimited Streaming
// =============================================================================

/// Interpretation of one line of a streaming HTTP body
pub(crate) enum LineEvent {
    Chunk(String),
    Skip,
    Done,
    Error(String),
}

/// Spawn a producer that splits an HTTP body into lines, maps each through
/// `parse_line`, and forwards chunks over a bounded channel. Dropping the
/// returned stream stops the producer and releases the connection.
pub(crate) fn spawn_line_stream<F>(
    response: reqwest::Response,
    provider: &'static str,
    parse_line: F,
) -> ChunkStream
where
    F: Fn(&str) -> LineEvent + Send + 'static,
{
    let (mut tx, rx) = mpsc::channel::<Result<String>>(32);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        // Raw bytes: a multi-byte character may straddle two network chunks
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(next) = body.next().await {
            let bytes = match next {
                Ok(b) => b,
                Err(e) => {
                    let err = ErrorClassifier::classify(&e.to_string(), provider);
                    let _ = tx.send(Err(err.into())).await;
                    return;
                }
            };
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw);
                match parse_line(line.trim()) {
                    LineEvent::Chunk(text) => {
                        if tx.send(Ok(text)).await.is_err() {
                            debug!("{} stream receiver dropped", provider);
                            return;
                        }
                    }
                    LineEvent::Skip => {}
                    LineEvent::Done => return,
                    LineEvent::Error(message) => {
                        let err = ErrorClassifier::classify(&message, provider);
                        let _ = tx.send(Err(err.into())).await;
                        return;
                    }
                }
            }
        }

        let rest = String::from_utf8_lossy(&buffer);
        if let LineEvent::Chunk(text) = parse_line(rest.trim()) {
            let _ = tx.send(Ok(text)).await;
        }
    });

    Box::pin(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoEngine;

    #[async_trait]
    impl CompletionEngine for EchoEngine {
        async fn generate(&self, _system: &str, user: &str, _max: usize) -> Result<String> {
            Ok(user.to_string())
        }

        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }
    }

    #[tokio::test]
    async fn test_default_stream_yields_full_text() {
        let stream = EchoEngine.generate_stream("", "hello", 10).await.unwrap();
        assert_eq!(collect_stream(stream).await.unwrap(), "hello");
    }

    #[test]
    fn test_create_offline_engine() {
        let engine = create_engine(&LlmConfig::default()).unwrap();
        assert_eq!(engine.name(), "offline");
    }

    #[test]
    fn test_create_unknown_engine() {
        let config = LlmConfig {
            provider: "nope".to_string(),
            ..LlmConfig::default()
        };
        assert!(create_engine(&config).is_err());
    }
}
