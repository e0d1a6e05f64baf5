//! Run Event Sink
//!
//! Fire-and-forget emitter over an unbounded channel. Sending never blocks
//! and a dropped receiver only drops events, so the pipeline cannot stall on
//! a slow or absent consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde_json::json;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::trace;

use crate::ai::ParsedFile;
use crate::constants::pipeline::progress;
use crate::types::{Run, Stage, StreamEvent, VerificationResult};

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<UnboundedSender<StreamEvent>>,
    progress: Arc<AtomicU8>,
}

impl EventSink {
    pub fn channel() -> (Self, UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = unbounded_channel();
        let sink = Self {
            tx: Some(tx),
            progress: Arc::new(AtomicU8::new(0)),
        };
        (sink, rx)
    }

    /// Sink that discards everything
    pub fn disabled() -> Self {
        Self {
            tx: None,
            progress: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn emit(&self, event: StreamEvent) {
        trace!("event: {}", event.kind());
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn stage_started(&self, stage: Stage) {
        self.emit(StreamEvent::StageStarted { stage });
    }

    /// Report progress. Never decreases, and stays below 100 until Report.
    pub fn progress(&self, stage: Stage, pct: u8) {
        let ceiling = if stage == Stage::Report {
            progress::REPORT
        } else {
            progress::REPORT - 1
        };
        let pct = pct.min(ceiling);
        let previous = self.progress.fetch_max(pct, Ordering::SeqCst);
        self.emit(StreamEvent::BuildProgress {
            stage,
            progress_pct: previous.max(pct),
        });
    }

    pub fn reasoning(&self, stage: Stage, content: impl Into<String>) {
        self.emit(StreamEvent::ReasoningStep {
            stage,
            content: content.into(),
        });
    }

    /// `token` with the full content, then `file_closed`
    pub fn file(&self, stage: Stage, file: &ParsedFile) {
        self.emit(StreamEvent::Token {
            stage,
            filename: file.path.clone(),
            content: file.content.clone(),
        });
        self.emit(StreamEvent::FileClosed {
            stage,
            filename: file.path.clone(),
        });
    }

    pub fn test_result(&self, stage: Stage, result: &VerificationResult) {
        self.emit(StreamEvent::TestResult {
            stage,
            test_results: result.clone(),
        });
    }

    pub fn build_ok(&self, run: &Run) {
        let content = if run.success {
            "Generation complete"
        } else {
            "Generation finished with failing tests"
        };
        self.emit(StreamEvent::BuildOk {
            content: content.to_string(),
            data: json!({
                "runId": run.id,
                "success": run.success,
                "repairAttempts": run.repair_attempts,
                "files": run.final_files,
                "testResults": run.last_result,
            }),
        });
    }

    pub fn build_error(&self, stage: Stage, content: impl Into<String>) {
        self.emit(StreamEvent::BuildError {
            stage,
            content: content.into(),
        });
    }

    pub fn error(&self, content: impl Into<String>) {
        self.emit(StreamEvent::Error {
            content: content.into(),
        });
    }
}

/// Progress after `attempt` of `max` repairs, between Execute and the
/// repair ceiling
pub fn repair_progress(attempt: u32, max: u32) -> u8 {
    if max == 0 {
        return progress::EXECUTE;
    }
    let span = u32::from(progress::REPAIR_CEILING - progress::EXECUTE);
    let step = span * attempt.min(max) / max;
    progress::EXECUTE + step as u8
}
