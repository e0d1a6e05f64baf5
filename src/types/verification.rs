//! Verification Results
//!
//! Outcome of running a test suite in the sandbox. Counts are derived, never
//! supplied independently, so `passed_count + failed_count == total_count` and
//! `passed == (failed_count == 0 && total_count > 0)` hold for every value,
//! including ones read back from storage.

use serde::{Deserialize, Serialize};

/// Outcome of a single test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseResult {
    pub name: String,
    pub outcome: TestOutcome,
}

impl CaseResult {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: TestOutcome::Passed,
        }
    }

    pub fn failed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: TestOutcome::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawVerification")]
pub struct VerificationResult {
    passed: bool,
    passed_count: u32,
    failed_count: u32,
    total_count: u32,
    diagnostics: String,
    per_case: Vec<CaseResult>,
    duration_ms: u64,
    timed_out: bool,
}

impl VerificationResult {
    /// Result from individual case outcomes
    pub fn from_cases(cases: Vec<CaseResult>, diagnostics: impl Into<String>) -> Self {
        let passed_count = cases
            .iter()
            .filter(|c| c.outcome == TestOutcome::Passed)
            .count() as u32;
        let failed_count = cases.len() as u32 - passed_count;
        Self::build(passed_count, failed_count, cases, diagnostics.into())
    }

    /// Result from aggregate counts when the runner gives no per-case detail
    pub fn from_counts(passed_count: u32, failed_count: u32, diagnostics: impl Into<String>) -> Self {
        Self::build(passed_count, failed_count, Vec::new(), diagnostics.into())
    }

    /// Failing result for a run that produced no usable test output
    pub fn failure(diagnostics: impl Into<String>) -> Self {
        Self::build(0, 0, Vec::new(), diagnostics.into())
    }

    /// Failing result for a wall-clock timeout
    pub fn timeout() -> Self {
        let mut result = Self::failure("timeout");
        result.timed_out = true;
        result
    }

    fn build(passed_count: u32, failed_count: u32, per_case: Vec<CaseResult>, diagnostics: String) -> Self {
        let total_count = passed_count + failed_count;
        Self {
            passed: failed_count == 0 && total_count > 0,
            passed_count,
            failed_count,
            total_count,
            diagnostics,
            per_case,
            duration_ms: 0,
            timed_out: false,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn passed_count(&self) -> u32 {
        self.passed_count
    }

    pub fn failed_count(&self) -> u32 {
        self.failed_count
    }

    pub fn total_count(&self) -> u32 {
        self.total_count
    }

    pub fn diagnostics(&self) -> &str {
        &self.diagnostics
    }

    pub fn per_case(&self) -> &[CaseResult] {
        &self.per_case
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Names of failing cases
    pub fn failing_cases(&self) -> impl Iterator<Item = &str> {
        self.per_case
            .iter()
            .filter(|c| c.outcome == TestOutcome::Failed)
            .map(|c| c.name.as_str())
    }
}

/// Wire shape; re-derives every invariant on the way in
#[derive(Deserialize)]
struct RawVerification {
    passed_count: u32,
    failed_count: u32,
    #[serde(default)]
    diagnostics: String,
    #[serde(default)]
    per_case: Vec<CaseResult>,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    timed_out: bool,
}

impl TryFrom<RawVerification> for VerificationResult {
    type Error = String;

    fn try_from(raw: RawVerification) -> Result<Self, Self::Error> {
        let mut result = if raw.per_case.is_empty() {
            Self::from_counts(raw.passed_count, raw.failed_count, raw.diagnostics)
        } else {
            let from_cases = Self::from_cases(raw.per_case, raw.diagnostics);
            if from_cases.passed_count != raw.passed_count
                || from_cases.failed_count != raw.failed_count
            {
                return Err(format!(
                    "per-case outcomes ({}/{}) disagree with counts ({}/{})",
                    from_cases.passed_count,
                    from_cases.failed_count,
                    raw.passed_count,
                    raw.failed_count
                ));
            }
            from_cases
        };
        result.duration_ms = raw.duration_ms;
        result.timed_out = raw.timed_out;
        Ok(result)
    }
}
