//! Generation Pipeline
//!
//! Six-stage state machine driving one run:
//!
//! ```text
//! Interpret → Scaffold → UnitTest → Execute ⇄ Repair → Report
//!                 └────────── skip tests ──────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - Each stage emits one `stage_started` and at least one content or result
//!   event, and the run is persisted before the next stage begins.
//! - `repair_attempts` is incremented once per Repair entry, before Execute
//!   runs again, and never exceeds the run's budget.
//! - Engine and sandbox failures are absorbed (fallbacks, failing results).
//!   Anything else aborts the run with a single `build_error`.
//! - Cancellation is checked at every stage boundary and interrupts in-flight
//!   engine and sandbox awaits.

pub mod events;
mod stages;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub use events::EventSink;

use self::events::repair_progress;
use self::stages::StageEngine;
use crate::ai::{SharedEngine, cancellable};
use crate::config::PipelineConfig;
use crate::constants::pipeline::progress;
use crate::sandbox::SharedTestRunner;
use crate::storage::SharedRecorder;
use crate::types::{
    Degradation, FileSet, Observation, Result, Run, RunRequest, Stage, StreamEvent, VerificationResult,
    VerigenError,
};

/// Handle to a run started in the background
pub struct RunHandle {
    pub run_id: String,
    pub events: UnboundedReceiver<StreamEvent>,
    pub cancel: CancellationToken,
    pub join: JoinHandle<Run>,
}

impl RunHandle {
    /// Wait for the terminal run snapshot
    pub async fn wait(self) -> Result<Run> {
        self.join.await.map_err(|e| VerigenError::UnhandledRun {
            stage: "unknown".to_string(),
            message: format!("run task failed: {}", e),
        })
    }
}

pub struct GenerationPipeline {
    stages: StageEngine,
    runner: SharedTestRunner,
    recorder: Option<SharedRecorder>,
    config: PipelineConfig,
}

impl GenerationPipeline {
    pub fn new(engine: SharedEngine, runner: SharedTestRunner, config: PipelineConfig) -> Self {
        Self {
            stages: StageEngine::new(engine, Duration::from_secs(config.stage_timeout_secs)),
            runner,
            recorder: None,
            config,
        }
    }

    pub fn with_recorder(mut self, recorder: SharedRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Fresh run for a request, using the configured repair budget unless
    /// the request overrides it
    pub fn new_run(&self, request: &RunRequest) -> Run {
        Run::new(request, self.config.max_repair_attempts)
    }

    /// Spawn a run and return its event stream, cancellation token and join
    /// handle
    pub fn start(self: &Arc<Self>, request: RunRequest) -> RunHandle {
        let (sink, events) = EventSink::channel();
        let cancel = CancellationToken::new();
        let run = self.new_run(&request);
        let run_id = run.id.clone();

        let pipeline = Arc::clone(self);
        let token = cancel.clone();
        let join = tokio::spawn(async move { pipeline.execute_run(run, sink, token).await });

        RunHandle {
            run_id,
            events,
            cancel,
            join,
        }
    }

    /// Run a request to completion
    pub async fn run(&self, request: RunRequest, sink: EventSink, cancel: CancellationToken) -> Run {
        let run = self.new_run(&request);
        self.execute_run(run, sink, cancel).await
    }

    /// Drive `run` to a terminal state. Never fails: errors end the run.
    #[instrument(skip_all, fields(run_id = %run.id, skip_tests = run.skip_tests))]
    pub async fn execute_run(&self, mut run: Run, sink: EventSink, cancel: CancellationToken) -> Run {
        info!(
            "Generation Pipeline: Starting (max_repairs={}, runner={})",
            run.max_repair_attempts,
            self.runner.name()
        );

        if let Err(e) = self.drive(&mut run, &sink, &cancel).await {
            self.abort(&mut run, &sink, e).await;
        }

        info!(
            "Generation Pipeline: Finished (success={}, repairs={}, latency={}ms)",
            run.success,
            run.repair_attempts,
            run.latency_ms()
        );
        run
    }

    async fn drive(&self, run: &mut Run, sink: &EventSink, cancel: &CancellationToken) -> Result<()> {
        // ===== Interpret =====
        self.enter(run, Stage::Interpret, sink, cancel)?;
        let contract = self.stages.interpret(&run.prompt, sink, cancel).await?;
        run.contract = Some(contract.clone());
        sink.progress(Stage::Interpret, progress::INTERPRET);
        self.record(run).await?;

        // ===== Scaffold =====
        self.enter(run, Stage::Scaffold, sink, cancel)?;
        let scaffold = self.stages.scaffold(&contract, sink, cancel).await?;
        run.scaffold_files = scaffold.clone();
        sink.progress(Stage::Scaffold, progress::SCAFFOLD);
        self.record(run).await?;

        if run.skip_tests {
            info!("Tests skipped; going straight to Report");
            return self.report(run, scaffold, sink, cancel).await;
        }

        // ===== UnitTest =====
        self.enter(run, Stage::UnitTest, sink, cancel)?;
        let tests = self.stages.unit_test(&contract, &scaffold, sink, cancel).await?;
        run.test_files = tests.clone();
        sink.progress(Stage::UnitTest, progress::UNIT_TEST);
        self.record(run).await?;

        // ===== Execute ⇄ Repair =====
        let mut files = scaffold;
        loop {
            self.enter(run, Stage::Execute, sink, cancel)?;
            let result = self.execute(&files, &tests, cancel).await?;
            info!(
                "Execute: {}/{} passed{}",
                result.passed_count(),
                result.total_count(),
                if result.timed_out() { " (timed out)" } else { "" }
            );
            sink.test_result(Stage::Execute, &result);
            let passed = result.passed();
            run.last_result = Some(result);
            sink.progress(Stage::Execute, repair_progress(run.repair_attempts, run.max_repair_attempts));
            self.record(run).await?;

            if !run.can_repair() {
                if !passed {
                    warn!(
                        "{} after {} attempts",
                        Degradation::RepairBudgetExhausted,
                        run.repair_attempts
                    );
                    sink.reasoning(
                        Stage::Execute,
                        format!("{}: tests still failing after {} repairs", Degradation::RepairBudgetExhausted, run.repair_attempts),
                    );
                }
                break;
            }

            self.enter(run, Stage::Repair, sink, cancel)?;
            run.repair_attempts += 1;
            let last = run.last_result.clone().unwrap_or_else(|| VerificationResult::failure(""));
            files = self
                .stages
                .repair(&contract, &files, &tests, &last, sink, cancel)
                .await?;
            run.final_files = files.clone();
            sink.progress(Stage::Repair, repair_progress(run.repair_attempts, run.max_repair_attempts));
            self.record(run).await?;
        }

        self.report(run, files, sink, cancel).await
    }

    /// Check cancellation, move to `stage` and announce it
    fn enter(&self, run: &mut Run, stage: Stage, sink: &EventSink, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(VerigenError::Cancelled);
        }
        if run.stage != stage {
            run.transition(stage)?;
        }
        info!("Stage {}: {}", stage.as_u8(), stage.name());
        sink.stage_started(stage);
        Ok(())
    }

    /// Sandbox failures become failing results; cancellation and anything
    /// else propagate
    async fn execute(&self, files: &FileSet, tests: &FileSet, cancel: &CancellationToken) -> Result<VerificationResult> {
        match cancellable(cancel, self.runner.run_tests(files, tests)).await {
            Ok(result) => Ok(result),
            Err(VerigenError::SandboxTimeout { .. }) => Ok(VerificationResult::timeout()),
            Err(e) if e.is_sandbox_failure() => {
                warn!("Sandbox failure during Execute: {}", e);
                Ok(VerificationResult::failure(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn report(&self, run: &mut Run, files: FileSet, sink: &EventSink, cancel: &CancellationToken) -> Result<()> {
        self.enter(run, Stage::Report, sink, cancel)?;
        run.complete(files);
        sink.progress(Stage::Report, progress::REPORT);
        self.record(run).await?;

        if let Some(recorder) = &self.recorder {
            let observation = Observation::from_run(run, self.stages.model());
            if let Err(e) = recorder.record_observation(&observation).await {
                warn!("Failed to record observation for {}: {}", run.id, e);
                sink.error(format!("failed to record observation: {}", e));
            }
        }

        sink.build_ok(run);
        Ok(())
    }

    /// Terminal failure: one `build_error`, partial files kept, run persisted
    async fn abort(&self, run: &mut Run, sink: &EventSink, error: VerigenError) {
        let stage = run.stage;
        let message = match error {
            VerigenError::Cancelled => "cancelled".to_string(),
            other => other.to_string(),
        };
        warn!("Run {} aborted in {}: {}", run.id, stage, message);

        run.fail(message.clone());
        sink.build_error(stage, message);

        if let Some(recorder) = &self.recorder
            && let Err(e) = recorder.record_stage(run).await
        {
            warn!("Failed to persist aborted run {}: {}", run.id, e);
        }
    }

    async fn record(&self, run: &Run) -> Result<()> {
        match &self.recorder {
            Some(recorder) => recorder.record_stage(run).await,
            None => Ok(()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{CompletionEngine, OfflineEngine};
    use crate::sandbox::TestRunner;
    use crate::storage::Database;
    use crate::types::{CaseResult, ErrorCategory, LlmError};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // -------------------------------------------------------------------------
    // Doubles
    // -------------------------------------------------------------------------

    /// Replies in call order; unavailable once the script runs out
    struct ScriptedEngine {
        replies: Mutex<VecDeque<Result<String>>>,
    }

    impl ScriptedEngine {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
            })
        }
    }

    #[async_trait]
    impl CompletionEngine for ScriptedEngine {
        async fn generate(&self, _system: &str, _user: &str, _max_tokens: usize) -> Result<String> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(LlmError::new(ErrorCategory::Unavailable, "script exhausted").into()))
        }

        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-model"
        }
    }

    /// Returns scripted results in order, repeating the last one
    struct ScriptedRunner {
        results: Mutex<VecDeque<Result<VerificationResult>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<FileSet>>,
        delay: Option<Duration>,
    }

    impl ScriptedRunner {
        fn new(results: Vec<Result<VerificationResult>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                delay: None,
            })
        }

        fn passing() -> Arc<Self> {
            Self::new(vec![Ok(pass())])
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(VecDeque::from([Ok(pass())])),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                delay: Some(delay),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TestRunner for ScriptedRunner {
        async fn run_tests(&self, files: &FileSet, _tests: &FileSet) -> Result<VerificationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(files.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut results = self.results.lock().unwrap();
            if results.len() > 1 {
                results.pop_front().unwrap()
            } else {
                match results.front().unwrap() {
                    Ok(r) => Ok(r.clone()),
                    Err(_) => Err(VerigenError::sandbox_failed("scripted", "boom")),
                }
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn pass() -> VerificationResult {
        VerificationResult::from_cases(vec![CaseResult::passed("renders")], "")
    }

    fn fail() -> VerificationResult {
        VerificationResult::from_cases(vec![CaseResult::failed("renders")], "expected true")
    }

    fn pipeline(engine: SharedEngine, runner: SharedTestRunner, max_repairs: u32) -> GenerationPipeline {
        let config = PipelineConfig {
            max_repair_attempts: max_repairs,
            stage_timeout_secs: 5,
        };
        GenerationPipeline::new(engine, runner, config)
    }

    fn offline() -> SharedEngine {
        Arc::new(OfflineEngine::new())
    }

    fn drain(rx: &mut UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn started_stages(events: &[StreamEvent]) -> Vec<Stage> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::StageStarted { stage } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    async fn run_request(pipeline: &GenerationPipeline, request: RunRequest) -> (Run, Vec<StreamEvent>) {
        let (sink, mut rx) = EventSink::channel();
        let run = pipeline.run(request, sink, CancellationToken::new()).await;
        (run, drain(&mut rx))
    }

    // -------------------------------------------------------------------------
    // Scenarios
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_fallback_engine_with_passing_runner() {
        let runner = ScriptedRunner::passing();
        let pipeline = pipeline(offline(), runner.clone(), 2);
        let (run, events) = run_request(&pipeline, RunRequest::new("A counter button")).await;

        assert!(run.success);
        assert_eq!(run.repair_attempts, 0);
        assert_eq!(run.stage, Stage::Report);
        assert_eq!(run.scaffold_files.len(), 1);
        assert!(run.scaffold_files.contains("src/Component.tsx"));
        assert_eq!(run.test_files.len(), 1);
        assert!(run.test_files.contains("src/Component.test.tsx"));
        assert_eq!(run.contract.as_ref().unwrap().target_framework, "react");
        assert_eq!(runner.calls(), 1);
        assert!(run.completed_at.is_some());

        assert_eq!(
            started_stages(&events),
            vec![Stage::Interpret, Stage::Scaffold, Stage::UnitTest, Stage::Execute, Stage::Report]
        );
        assert!(matches!(events.last(), Some(StreamEvent::BuildOk { .. })));
    }

    #[tokio::test]
    async fn test_repairs_until_passing() {
        let runner = ScriptedRunner::new(vec![Ok(fail()), Ok(fail()), Ok(pass())]);
        let pipeline = pipeline(offline(), runner.clone(), 2);
        let (run, events) = run_request(&pipeline, RunRequest::new("x")).await;

        assert!(run.success);
        assert_eq!(run.repair_attempts, 2);
        assert_eq!(runner.calls(), 3);
        assert_eq!(
            started_stages(&events),
            vec![
                Stage::Interpret,
                Stage::Scaffold,
                Stage::UnitTest,
                Stage::Execute,
                Stage::Repair,
                Stage::Execute,
                Stage::Repair,
                Stage::Execute,
                Stage::Report,
            ]
        );
    }

    #[tokio::test]
    async fn test_repair_budget_exhausted() {
        let runner = ScriptedRunner::new(vec![Ok(fail())]);
        let pipeline = pipeline(offline(), runner.clone(), 2);
        let (run, events) = run_request(&pipeline, RunRequest::new("x")).await;

        assert!(!run.success);
        assert_eq!(run.repair_attempts, 2);
        assert_eq!(run.stage, Stage::Report);
        assert!(run.error_message.is_none());
        assert_eq!(runner.calls(), 3);
        // Exhaustion is not an error: the run still ends with build_ok
        assert!(matches!(events.last(), Some(StreamEvent::BuildOk { .. })));
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::BuildError { .. })));
    }

    #[tokio::test]
    async fn test_zero_repair_budget_never_repairs() {
        let runner = ScriptedRunner::new(vec![Ok(fail())]);
        let pipeline = pipeline(offline(), runner.clone(), 0);
        let (run, events) = run_request(&pipeline, RunRequest::new("x")).await;

        assert!(!run.success);
        assert_eq!(run.repair_attempts, 0);
        assert!(!started_stages(&events).contains(&Stage::Repair));
    }

    #[tokio::test]
    async fn test_skip_tests_short_circuits() {
        let runner = ScriptedRunner::new(vec![Ok(fail())]);
        let pipeline = pipeline(offline(), runner.clone(), 2);
        let (run, events) = run_request(&pipeline, RunRequest::new("x").skip_tests(true)).await;

        assert!(run.success);
        assert_eq!(runner.calls(), 0);
        assert!(run.test_files.is_empty());
        assert_eq!(run.final_files, run.scaffold_files);
        assert_eq!(
            started_stages(&events),
            vec![Stage::Interpret, Stage::Scaffold, Stage::Report]
        );
    }

    #[tokio::test]
    async fn test_sandbox_failure_feeds_repair() {
        let runner = ScriptedRunner::new(vec![
            Err(VerigenError::sandbox_failed("test-runner", "vitest: not found")),
            Ok(pass()),
        ]);
        let pipeline = pipeline(offline(), runner.clone(), 2);
        let (run, events) = run_request(&pipeline, RunRequest::new("x")).await;

        assert!(run.success);
        assert_eq!(run.repair_attempts, 1);
        let first = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::TestResult { test_results, .. } => Some(test_results.clone()),
                _ => None,
            })
            .unwrap();
        assert!(!first.passed());
        assert!(first.diagnostics().contains("vitest: not found"));
    }

    #[tokio::test]
    async fn test_sandbox_timeout_becomes_timeout_result() {
        let runner = ScriptedRunner::new(vec![
            Err(VerigenError::SandboxTimeout {
                tool: "test-runner".into(),
                duration: Duration::from_secs(1),
            }),
            Ok(pass()),
        ]);
        let pipeline = pipeline(offline(), runner, 1);
        let (run, events) = run_request(&pipeline, RunRequest::new("x")).await;

        assert!(run.success);
        let first = events
            .iter()
            .find_map(|e| match e {
                StreamEvent::TestResult { test_results, .. } => Some(test_results.clone()),
                _ => None,
            })
            .unwrap();
        assert!(first.timed_out());
        assert_eq!(first.diagnostics(), "timeout");
    }

    // -------------------------------------------------------------------------
    // Engine output
    // -------------------------------------------------------------------------

    const CONTRACT: &str = r#"Sure! {"summary": "Counter", "targetLanguage": "typescript",
        "targetFramework": "react", "components": ["Counter"], "edgeCases": ["negative"],}"#;

    const SCAFFOLD: &str = "```tsx\n// filename: src/Counter.tsx\nexport const Counter = () => null; // TODO\n```\n";

    const TESTS: &str = "```tsx\n// filename: src/Counter.test.tsx\nit('renders', () => {});\n```\n";

    const PATCH: &str = "```tsx\n// filename: src/Counter.tsx\nexport const Counter = () => 1;\n```\n";

    #[tokio::test]
    async fn test_engine_files_stream_as_events_and_repair_merges() {
        let engine = ScriptedEngine::new(vec![
            Ok(CONTRACT.to_string()),
            Ok(format!("{}```json\n// filename: package.json\n{{}}\n```\n", SCAFFOLD)),
            Ok(TESTS.to_string()),
            Ok(PATCH.to_string()),
        ]);
        let runner = ScriptedRunner::new(vec![Ok(fail()), Ok(pass())]);
        let pipeline = pipeline(engine, runner.clone(), 2);
        let (run, events) = run_request(&pipeline, RunRequest::new("counter")).await;

        assert!(run.success);
        assert_eq!(run.contract.as_ref().unwrap().components, vec!["Counter"]);
        assert_eq!(run.scaffold_files.len(), 2);
        assert_eq!(
            run.final_files.get("src/Counter.tsx"),
            Some("export const Counter = () => 1;\n")
        );
        assert_eq!(run.final_files.get("package.json"), Some("{}\n"));

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[1].get("src/Counter.tsx"), Some("export const Counter = () => 1;\n"));

        let tokens: Vec<(Stage, &str)> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Token { stage, filename, .. } => Some((*stage, filename.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(
            tokens,
            vec![
                (Stage::Scaffold, "src/Counter.tsx"),
                (Stage::Scaffold, "package.json"),
                (Stage::UnitTest, "src/Counter.test.tsx"),
                (Stage::Repair, "src/Counter.tsx"),
            ]
        );
    }

    #[tokio::test]
    async fn test_repair_engine_failure_keeps_files() {
        let engine = ScriptedEngine::new(vec![
            Ok(CONTRACT.to_string()),
            Ok(SCAFFOLD.to_string()),
            Ok(TESTS.to_string()),
            Err(LlmError::new(ErrorCategory::Network, "connection reset").into()),
        ]);
        let runner = ScriptedRunner::new(vec![Ok(fail()), Ok(pass())]);
        let pipeline = pipeline(engine, runner.clone(), 2);
        let (run, _) = run_request(&pipeline, RunRequest::new("counter")).await;

        assert!(run.success);
        assert_eq!(run.repair_attempts, 1);
        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn test_unparsable_interpretation_falls_back() {
        let engine = ScriptedEngine::new(vec![Ok("I cannot produce JSON today".to_string())]);
        let pipeline = pipeline(engine, ScriptedRunner::passing(), 2);
        let (run, events) = run_request(&pipeline, RunRequest::new("x")).await;

        assert!(run.success);
        assert_eq!(run.contract.as_ref().unwrap().components, vec!["Component"]);
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::ReasoningStep { stage: Stage::Interpret, content } if content.contains("interpretation_degraded")
        )));
    }

    // -------------------------------------------------------------------------
    // Events, persistence, cancellation
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_event_order_and_progress() {
        let runner = ScriptedRunner::new(vec![Ok(fail()), Ok(pass())]);
        let pipeline = pipeline(offline(), runner, 2);
        let (_, events) = run_request(&pipeline, RunRequest::new("x")).await;

        let pcts: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::BuildProgress { progress_pct, .. } => Some(*progress_pct),
                _ => None,
            })
            .collect();
        assert!(pcts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(pcts.iter().filter(|p| **p == 100).count(), 1);
        assert_eq!(*pcts.last().unwrap(), 100);

        // Each test_result sits between its stage_started and the next one
        let mut current = None;
        for event in &events {
            match event {
                StreamEvent::StageStarted { stage } => current = Some(*stage),
                StreamEvent::TestResult { stage, .. } => assert_eq!(current, Some(*stage)),
                _ => {}
            }
        }

        // Every stage has content beyond its stage_started
        let mut counts = Vec::new();
        for event in &events {
            match event {
                StreamEvent::StageStarted { .. } => counts.push(0),
                _ => {
                    if let Some(last) = counts.last_mut() {
                        *last += 1;
                    }
                }
            }
        }
        assert!(counts.iter().all(|c| *c >= 1));
    }

    #[tokio::test]
    async fn test_stages_and_observation_are_recorded() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.initialize().unwrap();
        let runner = ScriptedRunner::new(vec![Ok(fail()), Ok(pass())]);
        let pipeline = pipeline(offline(), runner, 2).with_recorder(db.clone());
        let (run, _) = run_request(&pipeline, RunRequest::new("x").project("demo")).await;

        let stored = db.load_run(&run.id).unwrap().unwrap();
        assert!(stored.success);
        assert_eq!(stored.stage, Stage::Report);
        assert_eq!(stored.repair_attempts, 1);

        let history: Vec<Stage> = db.stage_history(&run.id).unwrap().iter().map(|s| s.stage).collect();
        assert_eq!(
            history,
            vec![
                Stage::Interpret,
                Stage::Scaffold,
                Stage::UnitTest,
                Stage::Execute,
                Stage::Repair,
                Stage::Execute,
                Stage::Report,
            ]
        );

        let observation = db.load_observation(&run.id).unwrap().unwrap();
        assert_eq!(observation.passed_count, 1);
        assert_eq!(observation.model, "none");
        assert_eq!(observation.project_ref.as_deref(), Some("demo"));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_execute() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.initialize().unwrap();
        let runner = ScriptedRunner::slow(Duration::from_secs(30));
        let pipeline = Arc::new(pipeline(offline(), runner, 2).with_recorder(db.clone()));

        let RunHandle {
            run_id,
            mut events,
            cancel,
            join,
        } = pipeline.start(RunRequest::new("x"));
        loop {
            match events.recv().await {
                Some(StreamEvent::StageStarted { stage: Stage::Execute }) => break,
                Some(_) => continue,
                None => panic!("event stream ended early"),
            }
        }
        cancel.cancel();

        let run = join.await.unwrap();
        assert!(!run.success);
        assert_eq!(run.stage, Stage::Report);
        assert_eq!(run.error_message.as_deref(), Some("cancelled"));
        assert_eq!(run.id, run_id);
        assert!(!run.final_files.is_empty());

        let rest = drain(&mut events);
        let errors: Vec<_> = rest
            .iter()
            .filter(|e| matches!(e, StreamEvent::BuildError { .. }))
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(!rest.iter().any(|e| matches!(e, StreamEvent::BuildOk { .. })));

        let stored = db.load_run(&run_id).unwrap().unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let pipeline = pipeline(offline(), ScriptedRunner::passing(), 2);
        let (sink, mut rx) = EventSink::channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = pipeline.run(RunRequest::new("x"), sink, cancel).await;
        assert!(!run.success);
        assert_eq!(run.error_message.as_deref(), Some("cancelled"));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], StreamEvent::BuildError { stage: Stage::Interpret, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_independent() {
        let pipeline = Arc::new(pipeline(offline(), ScriptedRunner::passing(), 2));
        let handles: Vec<_> = (0..4)
            .map(|i| pipeline.start(RunRequest::new(format!("prompt {}", i))))
            .collect();

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            let run = handle.wait().await.unwrap();
            assert!(run.success);
            ids.insert(run.id);
        }
        assert_eq!(ids.len(), 4);
    }
}
