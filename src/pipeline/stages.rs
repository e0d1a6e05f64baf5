//! Engine-backed stages
//!
//! Interpret, Scaffold, UnitTest and Repair each make one engine call and
//! absorb engine failures locally. Only cancellation escapes.

use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::events::EventSink;
use crate::ai::{
    FileBlockParser, SharedEngine, StagePrompt, StagePrompts, cancellable, extract_json,
    fallback_scaffold, fallback_tests, with_timeout,
};
use crate::constants::pipeline::max_tokens;
use crate::types::{Contract, Degradation, FileSet, Result, Stage, VerificationResult, VerigenError};

pub(super) struct StageEngine {
    engine: SharedEngine,
    timeout: Duration,
}

impl StageEngine {
    pub fn new(engine: SharedEngine, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub fn model(&self) -> &str {
        self.engine.model()
    }

    /// Contract from the prompt, or the fallback contract
    pub async fn interpret(&self, prompt: &str, sink: &EventSink, cancel: &CancellationToken) -> Result<Contract> {
        let request = StagePrompts::interpret(prompt);
        let call = self.engine.generate(&request.system, &request.user, max_tokens::INTERPRET);
        let reply = cancellable(cancel, with_timeout(self.timeout, call, "interpret")).await;

        let parsed = match reply {
            Ok(text) => match extract_json(&text) {
                Ok(value) => Contract::from_value(prompt, &value)
                    .ok_or_else(|| "engine reply is not a JSON object".to_string()),
                Err(e) => Err(e.to_string()),
            },
            Err(VerigenError::Cancelled) => return Err(VerigenError::Cancelled),
            Err(e) => Err(e.to_string()),
        };

        let contract = match parsed {
            Ok(contract) => contract,
            Err(reason) => {
                degrade(sink, Stage::Interpret, Degradation::InterpretationDegraded, &reason);
                Contract::fallback(prompt)
            }
        };

        sink.reasoning(
            Stage::Interpret,
            format!(
                "{} ({} / {}; components: {})",
                contract.summary,
                contract.target_language,
                contract.target_framework,
                contract.components.join(", ")
            ),
        );
        Ok(contract)
    }

    /// Source files for the contract, never empty
    pub async fn scaffold(&self, contract: &Contract, sink: &EventSink, cancel: &CancellationToken) -> Result<FileSet> {
        let request = StagePrompts::scaffold(contract);
        self.generate_or_fallback(Stage::Scaffold, &request, max_tokens::SCAFFOLD, fallback_scaffold, sink, cancel)
            .await
    }

    /// Test files for the scaffold, never empty
    pub async fn unit_test(
        &self,
        contract: &Contract,
        files: &FileSet,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<FileSet> {
        let request = StagePrompts::unit_test(contract, files);
        self.generate_or_fallback(Stage::UnitTest, &request, max_tokens::UNIT_TEST, fallback_tests, sink, cancel)
            .await
    }

    /// Patched file set. Engine failure or an empty patch keeps `files`.
    pub async fn repair(
        &self,
        contract: &Contract,
        files: &FileSet,
        tests: &FileSet,
        result: &VerificationResult,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<FileSet> {
        let request = StagePrompts::repair(contract, files, tests, result);
        match self.stream_files(Stage::Repair, &request, max_tokens::REPAIR, sink, cancel).await {
            Ok(patch) if !patch.is_empty() => {
                let merged = files.merge(&patch);
                let diff = files.diff(&merged);
                sink.reasoning(Stage::Repair, format!("Patched {} files ({})", patch.len(), diff.summary()));
                Ok(merged)
            }
            Ok(_) => {
                warn!("Repair returned no files; keeping previous files");
                sink.reasoning(Stage::Repair, "Repair returned no files; keeping previous files");
                Ok(files.clone())
            }
            Err(VerigenError::Cancelled) => Err(VerigenError::Cancelled),
            Err(e) => {
                warn!("Repair failed: {}; keeping previous files", e);
                sink.reasoning(Stage::Repair, format!("Repair failed: {}; keeping previous files", e));
                Ok(files.clone())
            }
        }
    }

    async fn generate_or_fallback(
        &self,
        stage: Stage,
        request: &StagePrompt,
        max_tokens: usize,
        fallback: fn() -> FileSet,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<FileSet> {
        let reason = match self.stream_files(stage, request, max_tokens, sink, cancel).await {
            Ok(files) if !files.is_empty() => return Ok(files),
            Ok(_) => "no file blocks in engine reply".to_string(),
            Err(VerigenError::Cancelled) => return Err(VerigenError::Cancelled),
            Err(e) => e.to_string(),
        };

        degrade(sink, stage, Degradation::ScaffoldDegraded, &reason);
        let files = fallback();
        for (path, content) in files.iter() {
            sink.file(
                stage,
                &crate::ai::ParsedFile {
                    path: path.to_string(),
                    content: content.to_string(),
                },
            );
        }
        Ok(files)
    }

    /// Consume the engine stream, emitting each file as its block closes
    async fn stream_files(
        &self,
        stage: Stage,
        request: &StagePrompt,
        max_tokens: usize,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<FileSet> {
        let consume = async {
            let mut stream = self
                .engine
                .generate_stream(&request.system, &request.user, max_tokens)
                .await?;
            let mut parser = FileBlockParser::new();
            let mut files = Vec::new();

            while let Some(chunk) = stream.next().await {
                for file in parser.push(&chunk?) {
                    sink.file(stage, &file);
                    files.push(file);
                }
            }
            for file in parser.finish() {
                sink.file(stage, &file);
                files.push(file);
            }

            debug!("{} produced {} files", stage, files.len());
            Ok(files.into_iter().map(|f| (f.path, f.content)).collect::<FileSet>())
        };

        cancellable(cancel, with_timeout(self.timeout, consume, stage.as_str())).await
    }
}

fn degrade(sink: &EventSink, stage: Stage, degradation: Degradation, reason: &str) {
    warn!("{}: {} ({})", stage.name(), degradation, reason);
    sink.reasoning(stage, format!("{}: {}; using fallback", degradation, reason));
}
