//! Domain Types
//!
//! Files, contracts, runs, verification results, stream events and plugin
//! manifests shared by every layer.

pub mod contract;
pub mod error;
pub mod event;
pub mod files;
pub mod plugin;
pub mod run;
pub mod verification;

pub use contract::Contract;
pub use error::{
    Degradation, ErrorCategory, ErrorClassifier, LlmError, Result, ResultExt, VerigenError,
};
pub use event::StreamEvent;
pub use files::{FileDiff, FileSet, extension_of, validate_relative_path};
pub use plugin::{PluginExecution, PluginManifest, ToolInfo, kind_of_path, kinds_of};
pub use run::{Observation, Run, RunRequest, Stage};
pub use verification::{CaseResult, TestOutcome, VerificationResult};

/// Truncate to at most `max_chars` characters, appending an ellipsis marker
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{}\n... [truncated]", cut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        let long = truncate_chars(&"é".repeat(20), 5);
        assert!(long.starts_with("ééééé"));
        assert!(long.ends_with("[truncated]"));
    }
}
