//! Offline Engine
//!
//! Engine that never produces output. Every stage falls back to its
//! deterministic default, which makes the whole pipeline runnable without
//! network access or credentials.

use async_trait::async_trait;

use super::CompletionEngine;
use crate::types::{ErrorCategory, LlmError, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineEngine;

impl OfflineEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CompletionEngine for OfflineEngine {
    async fn generate(&self, _system: &str, _user: &str, _max_tokens: usize) -> Result<String> {
        Err(LlmError::with_provider(
            ErrorCategory::Unavailable,
            "completion engine is offline",
            "offline",
        )
        .into())
    }

    fn name(&self) -> &str {
        "offline"
    }

    fn model(&self) -> &str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VerigenError;

    #[tokio::test]
    async fn test_offline_is_unavailable() {
        let err = OfflineEngine.generate("s", "u", 10).await.unwrap_err();
        match err {
            VerigenError::Llm(e) => {
                assert_eq!(e.category, ErrorCategory::Unavailable);
                assert!(!e.is_retryable());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_offline_stream_is_unavailable() {
        assert!(OfflineEngine.generate_stream("s", "u", 10).await.is_err());
    }
}
