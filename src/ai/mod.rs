//! AI Integration Layer
//!
//! Completion engines, stage prompts and extraction of structured output
//! from engine replies.

pub mod extract;
pub mod prompt;
pub mod provider;
pub mod timeout;

pub use extract::{FileBlockParser, JsonRepairer, ParsedFile, extract_json, parse_file_blocks};
pub use prompt::{PromptBuilder, StagePrompt, StagePrompts, fallback_scaffold, fallback_tests};
pub use provider::{
    ChunkStream, CompletionEngine, ErrorCategory, ErrorClassifier, LlmError, OfflineEngine,
    OllamaEngine, OpenAiEngine, RetryConfig, RetryingEngine, SharedEngine, collect_stream,
    create_engine,
};
pub use timeout::{cancellable, with_timeout};
