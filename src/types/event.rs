//! Stream Events
//!
//! Typed progress events relayed to the caller, one JSON object per frame:
//!
//! ```json
//! {"type": "build_progress", "stage": "execute", "progressPct": 60}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::files::FileSet;
use super::run::Stage;
use super::verification::VerificationResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    StageStarted {
        stage: Stage,
    },
    /// Full content of one generated file
    Token {
        stage: Stage,
        filename: String,
        content: String,
    },
    FileClosed {
        stage: Stage,
        filename: String,
    },
    TestResult {
        stage: Stage,
        test_results: VerificationResult,
    },
    ReasoningStep {
        stage: Stage,
        content: String,
    },
    BuildProgress {
        stage: Stage,
        progress_pct: u8,
    },
    BuildOk {
        content: String,
        data: Value,
    },
    BuildError {
        stage: Stage,
        content: String,
    },
    Error {
        content: String,
    },
    PluginResult {
        plugin_name: String,
        files: FileSet,
        checksum: String,
    },
}

impl StreamEvent {
    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StageStarted { .. } => "stage_started",
            Self::Token { .. } => "token",
            Self::FileClosed { .. } => "file_closed",
            Self::TestResult { .. } => "test_result",
            Self::ReasoningStep { .. } => "reasoning_step",
            Self::BuildProgress { .. } => "build_progress",
            Self::BuildOk { .. } => "build_ok",
            Self::BuildError { .. } => "build_error",
            Self::Error { .. } => "error",
            Self::PluginResult { .. } => "plugin_result",
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::StageStarted { stage }
            | Self::Token { stage, .. }
            | Self::FileClosed { stage, .. }
            | Self::TestResult { stage, .. }
            | Self::ReasoningStep { stage, .. }
            | Self::BuildProgress { stage, .. }
            | Self::BuildError { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether this event ends a run's stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::BuildOk { .. } | Self::BuildError { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let event = StreamEvent::BuildProgress {
            stage: Stage::UnitTest,
            progress_pct: 40,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "build_progress");
        assert_eq!(json["stage"], "unit_test");
        assert_eq!(json["progressPct"], 40);
        assert_eq!(event.kind(), "build_progress");
    }

    #[test]
    fn test_token_event_fields() {
        let event = StreamEvent::Token {
            stage: Stage::Scaffold,
            filename: "src/App.tsx".into(),
            content: "x".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "token");
        assert_eq!(json["filename"], "src/App.tsx");
        let back: StreamEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_terminal_events() {
        assert!(
            StreamEvent::BuildError {
                stage: Stage::Execute,
                content: "x".into()
            }
            .is_terminal()
        );
        assert!(
            !StreamEvent::StageStarted {
                stage: Stage::Report
            }
            .is_terminal()
        );
    }
}
