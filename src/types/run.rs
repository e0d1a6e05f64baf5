//! Run Aggregate
//!
//! A [`Run`] is exclusively owned by the pipeline task executing it. The
//! recorder only ever receives clones. Stage changes go through
//! [`Run::transition`], which enforces forward-only movement with the single
//! Repair → Execute back edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::contract::Contract;
use super::error::{Result, VerigenError};
use super::files::{FileDiff, FileSet};
use super::verification::VerificationResult;

// =============================================================================
// Stage
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Interpret = 1,
    Scaffold = 2,
    UnitTest = 3,
    Execute = 4,
    Repair = 5,
    Report = 6,
}

impl Stage {
    /// Total number of stages
    pub const COUNT: usize = 6;

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Interpret => "Interpret",
            Self::Scaffold => "Scaffold",
            Self::UnitTest => "Unit Test",
            Self::Execute => "Execute",
            Self::Repair => "Repair",
            Self::Report => "Report",
        }
    }

    /// Stable identifier used on the wire and in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interpret => "interpret",
            Self::Scaffold => "scaffold",
            Self::UnitTest => "unit_test",
            Self::Execute => "execute",
            Self::Repair => "repair",
            Self::Report => "report",
        }
    }

    pub fn from_u8(stage: u8) -> Option<Self> {
        match stage {
            1 => Some(Self::Interpret),
            2 => Some(Self::Scaffold),
            3 => Some(Self::UnitTest),
            4 => Some(Self::Execute),
            5 => Some(Self::Repair),
            6 => Some(Self::Report),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "interpret" => Some(Self::Interpret),
            "scaffold" => Some(Self::Scaffold),
            "unit_test" => Some(Self::UnitTest),
            "execute" => Some(Self::Execute),
            "repair" => Some(Self::Repair),
            "report" => Some(Self::Report),
            _ => None,
        }
    }

    /// Whether `self → next` is a legal transition.
    ///
    /// Forward moves are always allowed (Scaffold → Report is the skip-tests
    /// path, any stage → Report is the failure path). The only backward move
    /// is Repair → Execute.
    pub fn can_transition_to(&self, next: Stage) -> bool {
        if *self == Stage::Report {
            return false;
        }
        next > *self || (*self == Stage::Repair && next == Stage::Execute)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Request
// =============================================================================

/// Caller input for a new run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub prompt: String,
    #[serde(default)]
    pub project_ref: Option<String>,
    #[serde(default)]
    pub skip_tests: bool,
    /// Overrides the configured repair budget for this run
    #[serde(default)]
    pub max_repair_attempts: Option<u32>,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            project_ref: None,
            skip_tests: false,
            max_repair_attempts: None,
        }
    }

    pub fn project(mut self, project_ref: impl Into<String>) -> Self {
        self.project_ref = Some(project_ref.into());
        self
    }

    pub fn skip_tests(mut self, skip: bool) -> Self {
        self.skip_tests = skip;
        self
    }

    pub fn max_repairs(mut self, max: u32) -> Self {
        self.max_repair_attempts = Some(max);
        self
    }
}

// =============================================================================
// Run
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub project_ref: Option<String>,
    pub prompt: String,
    pub stage: Stage,
    pub contract: Option<Contract>,
    pub scaffold_files: FileSet,
    pub test_files: FileSet,
    pub last_result: Option<VerificationResult>,
    pub final_files: FileSet,
    pub repair_attempts: u32,
    pub max_repair_attempts: u32,
    pub skip_tests: bool,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// New run in Interpret-pending state
    pub fn new(request: &RunRequest, max_repair_attempts: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_ref: request.project_ref.clone(),
            prompt: request.prompt.clone(),
            stage: Stage::Interpret,
            contract: None,
            scaffold_files: FileSet::new(),
            test_files: FileSet::new(),
            last_result: None,
            final_files: FileSet::new(),
            repair_attempts: 0,
            max_repair_attempts: request.max_repair_attempts.unwrap_or(max_repair_attempts),
            skip_tests: request.skip_tests,
            success: false,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: Stage) -> Result<()> {
        if self.is_terminal() || !self.stage.can_transition_to(next) {
            return Err(VerigenError::UnhandledRun {
                stage: self.stage.to_string(),
                message: format!("illegal transition {} -> {}", self.stage, next),
            });
        }
        self.stage = next;
        Ok(())
    }

    /// Whether the repair loop may run another attempt
    pub fn can_repair(&self) -> bool {
        let failing = self.last_result.as_ref().is_some_and(|r| !r.passed());
        failing && self.repair_attempts < self.max_repair_attempts
    }

    /// Latest non-empty file set produced so far
    pub fn latest_files(&self) -> &FileSet {
        if !self.final_files.is_empty() {
            &self.final_files
        } else {
            &self.scaffold_files
        }
    }

    /// Freeze a successful or budget-exhausted run at Report
    pub fn complete(&mut self, final_files: FileSet) {
        self.final_files = final_files;
        self.success = self.skip_tests || self.last_result.as_ref().is_some_and(|r| r.passed());
        self.stage = Stage::Report;
        self.completed_at = Some(Utc::now());
    }

    /// Terminate after an unhandled error, retaining partial files
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.final_files.is_empty() {
            self.final_files = self.scaffold_files.clone();
        }
        self.success = false;
        self.error_message = Some(message.into());
        self.stage = Stage::Report;
        self.completed_at = Some(Utc::now());
    }

    pub fn latency_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.created_at).num_milliseconds().max(0) as u64
    }
}

// =============================================================================
// Observation
// =============================================================================

/// Final measurement of a completed run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub run_id: String,
    pub project_ref: Option<String>,
    /// SHA-256 of the prompt, hex encoded
    pub prompt_fingerprint: String,
    pub prompt_text: String,
    pub files_digest: String,
    pub diff: FileDiff,
    pub passed_count: u32,
    pub failed_count: u32,
    pub latency_ms: u64,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    pub fn from_run(run: &Run, model: impl Into<String>) -> Self {
        use sha2::{Digest, Sha256};

        let fingerprint = hex::encode(Sha256::digest(run.prompt.as_bytes()));
        let (passed_count, failed_count) = run
            .last_result
            .as_ref()
            .map(|r| (r.passed_count(), r.failed_count()))
            .unwrap_or((0, 0));

        Self {
            run_id: run.id.clone(),
            project_ref: run.project_ref.clone(),
            prompt_fingerprint: fingerprint,
            prompt_text: run.prompt.clone(),
            files_digest: run.final_files.digest(),
            diff: run.scaffold_files.diff(&run.final_files),
            passed_count,
            failed_count,
            latency_ms: run.latency_ms(),
            model: model.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_roundtrip() {
        for n in 1..=Stage::COUNT as u8 {
            let stage = Stage::from_u8(n).unwrap();
            assert_eq!(stage.as_u8(), n);
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert!(Stage::from_u8(0).is_none());
    }

    #[test]
    fn test_stage_transitions() {
        assert!(Stage::Interpret.can_transition_to(Stage::Scaffold));
        assert!(Stage::Scaffold.can_transition_to(Stage::Report));
        assert!(Stage::Execute.can_transition_to(Stage::Repair));
        assert!(Stage::Repair.can_transition_to(Stage::Execute));
        assert!(!Stage::Execute.can_transition_to(Stage::Scaffold));
        assert!(!Stage::Scaffold.can_transition_to(Stage::Interpret));
        assert!(!Stage::Report.can_transition_to(Stage::Execute));
    }

    #[test]
    fn test_run_transition_rejects_backward() {
        let mut run = Run::new(&RunRequest::new("x"), 2);
        run.transition(Stage::Scaffold).unwrap();
        assert!(run.transition(Stage::Interpret).is_err());
        assert_eq!(run.stage, Stage::Scaffold);
    }

    #[test]
    fn test_can_repair_respects_budget() {
        let mut run = Run::new(&RunRequest::new("x"), 1);
        assert!(!run.can_repair());
        run.last_result = Some(VerificationResult::from_counts(0, 1, "fail"));
        assert!(run.can_repair());
        run.repair_attempts = 1;
        assert!(!run.can_repair());
    }

    #[test]
    fn test_request_overrides_budget() {
        let run = Run::new(&RunRequest::new("x").max_repairs(5), 2);
        assert_eq!(run.max_repair_attempts, 5);
    }

    #[test]
    fn test_fail_retains_partial_files() {
        let mut run = Run::new(&RunRequest::new("x"), 2);
        run.scaffold_files = FileSet::single("a.ts", "x");
        run.fail("boom");
        assert!(run.is_terminal());
        assert!(!run.success);
        assert_eq!(run.stage, Stage::Report);
        assert_eq!(run.final_files.get("a.ts"), Some("x"));
        assert_eq!(run.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_latest_files_prefers_final() {
        let mut run = Run::new(&RunRequest::new("x"), 2);
        assert!(run.latest_files().is_empty());
        run.scaffold_files = FileSet::single("a.ts", "draft");
        assert_eq!(run.latest_files().get("a.ts"), Some("draft"));
        run.complete(FileSet::single("a.ts", "done"));
        assert_eq!(run.latest_files().get("a.ts"), Some("done"));
    }

    #[test]
    fn test_observation_fingerprint() {
        let mut run = Run::new(&RunRequest::new("hello"), 2);
        run.complete(FileSet::single("a.ts", "x"));
        let obs = Observation::from_run(&run, "offline");
        assert_eq!(
            obs.prompt_fingerprint,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(obs.diff.added, vec!["a.ts"]);
    }
}
