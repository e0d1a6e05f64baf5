//! Test Runner Output Parsing
//!
//! Turns raw runner output into a [`VerificationResult`]. Formats are tried
//! in order:
//!
//! 1. Jest/Vitest JSON reporter (`numPassedTests`, `testResults[]`)
//! 2. TAP (`ok 1 - name` / `not ok 2 - name`)
//! 3. Human summary line (`Tests: 1 failed, 2 passed, 3 total`)
//!
//! Anything else is a failing result that carries the raw output as
//! diagnostics.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::types::{CaseResult, TestOutcome, VerificationResult};

static TAP_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(not )?ok\b\s*(\d+)?\s*(?:-\s*)?([^#]*)(#\s*(\w+))?").expect("valid TAP regex")
});

static SUMMARY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*Tests:?\s+(.+)$").expect("valid summary regex"));

static FAILED_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+failed").expect("valid failed regex"));

static PASSED_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+passed").expect("valid passed regex"));

/// Strip ANSI color sequences some runners emit even without a TTY
static ANSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid ansi regex"));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestReport {
    num_passed_tests: u32,
    num_failed_tests: u32,
    #[serde(default)]
    test_results: Vec<JestSuite>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestSuite {
    #[serde(default)]
    name: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    assertion_results: Vec<JestAssertion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JestAssertion {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    title: String,
    status: String,
    #[serde(default)]
    failure_messages: Vec<String>,
}

pub fn parse_test_output(stdout: &str, stderr: &str, exit_success: bool) -> VerificationResult {
    let stdout = ANSI.replace_all(stdout, "");
    let stderr = ANSI.replace_all(stderr, "");

    if let Some(result) = parse_jest_json(&stdout, &stderr) {
        return result;
    }

    let combined = format!("{}\n{}", stdout, stderr);
    if let Some(result) = parse_tap(&stdout, &combined) {
        return result;
    }
    if let Some(result) = parse_summary(&combined) {
        return result;
    }

    let reason = if exit_success {
        "no test results found in runner output"
    } else {
        "test runner failed"
    };
    VerificationResult::failure(format!("{}\n{}", reason, combined.trim()))
}

/// First JSON object in stdout that looks like a Jest report. Reporters may
/// print banners before the object, so each line starting with `{` is tried.
fn parse_jest_json(stdout: &str, stderr: &str) -> Option<VerificationResult> {
    let starts = stdout
        .match_indices('{')
        .map(|(i, _)| i)
        .filter(|&i| i == 0 || stdout[..i].ends_with('\n'));

    for start in starts {
        let mut stream =
            serde_json::Deserializer::from_str(&stdout[start..]).into_iter::<JestReport>();
        if let Some(Ok(report)) = stream.next() {
            return Some(jest_result(report, stderr));
        }
    }
    None
}

fn jest_result(report: JestReport, stderr: &str) -> VerificationResult {
    let mut cases = Vec::new();
    let mut diagnostics = Vec::new();

    for suite in &report.test_results {
        if !suite.message.trim().is_empty() {
            diagnostics.push(format!("{}\n{}", suite.name, suite.message.trim()));
        }
        for assertion in &suite.assertion_results {
            let name = if assertion.full_name.is_empty() {
                assertion.title.clone()
            } else {
                assertion.full_name.clone()
            };
            match assertion.status.as_str() {
                "passed" => cases.push(CaseResult::passed(name)),
                "failed" => {
                    for message in &assertion.failure_messages {
                        diagnostics.push(format!("{}: {}", name, message.trim()));
                    }
                    cases.push(CaseResult::failed(name));
                }
                // pending, skipped, todo
                _ => {}
            }
        }
    }

    if !stderr.trim().is_empty() {
        diagnostics.push(stderr.trim().to_string());
    }
    let diagnostics = diagnostics.join("\n\n");

    if cases.is_empty() {
        VerificationResult::from_counts(report.num_passed_tests, report.num_failed_tests, diagnostics)
    } else {
        VerificationResult::from_cases(cases, diagnostics)
    }
}

fn parse_tap(stdout: &str, combined: &str) -> Option<VerificationResult> {
    let mut cases = Vec::new();

    for line in stdout.lines() {
        let Some(caps) = TAP_LINE.captures(line.trim()) else {
            continue;
        };
        let directive = caps.get(5).map(|m| m.as_str().to_ascii_lowercase());
        if matches!(directive.as_deref(), Some("skip" | "todo")) {
            continue;
        }

        let number = caps.get(2).map(|m| m.as_str()).unwrap_or("?");
        let name = caps
            .get(3)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("test {}", number));

        if caps.get(1).is_some() {
            cases.push(CaseResult::failed(name));
        } else {
            cases.push(CaseResult::passed(name));
        }
    }

    if cases.is_empty() {
        return None;
    }
    let diagnostics = if cases.iter().any(|c| c.outcome == TestOutcome::Failed) {
        combined.trim().to_string()
    } else {
        String::new()
    };
    Some(VerificationResult::from_cases(cases, diagnostics))
}

fn parse_summary(combined: &str) -> Option<VerificationResult> {
    let line = SUMMARY_LINE.captures_iter(combined).last()?.get(1)?.as_str();
    let count = |re: &Regex| {
        re.captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
    };
    let failed = count(&FAILED_COUNT);
    let passed = count(&PASSED_COUNT);
    if failed.is_none() && passed.is_none() {
        return None;
    }

    let failed = failed.unwrap_or(0);
    let diagnostics = if failed > 0 {
        combined.trim().to_string()
    } else {
        String::new()
    };
    Some(VerificationResult::from_counts(passed.unwrap_or(0), failed, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;

    const JEST_JSON: &str = r#"{"numPassedTests":1,"numFailedTests":1,"numTotalTests":2,"success":false,
"testResults":[{"name":"/w/src/Counter.test.tsx","message":"","assertionResults":[
{"fullName":"Counter renders","title":"renders","status":"passed","failureMessages":[]},
{"fullName":"Counter increments","title":"increments","status":"failed","failureMessages":["expected 1 received 0"]},
{"fullName":"Counter todo","title":"todo","status":"todo","failureMessages":[]}]}]}"#;

    #[test]
    fn test_parse_jest_json_with_banner() {
        let stdout = format!("RUN v1.0.0 /w\n{}\n", JEST_JSON);
        let result = parse_test_output(&stdout, "", false);
        assert!(!result.passed());
        assert_eq!(result.passed_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.total_count(), 2);
        assert_eq!(result.failing_cases().collect::<Vec<_>>(), vec!["Counter increments"]);
        assert!(result.diagnostics().contains("expected 1 received 0"));
    }

    #[test]
    fn test_parse_jest_counts_without_assertions() {
        let stdout = r#"{"numPassedTests":3,"numFailedTests":0,"testResults":[]}"#;
        let result = parse_test_output(stdout, "", true);
        assert!(result.passed());
        assert_eq!(result.total_count(), 3);
    }

    #[test]
    fn test_parse_tap() {
        let stdout = "TAP version 13\nok 1 - renders\nnot ok 2 - increments\nok 3 - pending # SKIP later\n1..3\n";
        let result = parse_test_output(stdout, "", false);
        assert_eq!(result.passed_count(), 1);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.failing_cases().collect::<Vec<_>>(), vec!["increments"]);
    }

    #[test]
    fn test_parse_summary_line() {
        let stdout = "\x1b[32m✓\x1b[0m src/a.test.ts\n Tests:  1 failed, 4 passed, 5 total\n";
        let result = parse_test_output(stdout, "", false);
        assert_eq!(result.passed_count(), 4);
        assert_eq!(result.failed_count(), 1);

        let vitest = "      Tests  3 passed (3)\n";
        assert!(parse_test_output(vitest, "", true).passed());
    }

    #[test]
    fn test_unparsable_output_fails_with_diagnostics() {
        let result = parse_test_output("", "sh: vitest: not found", false);
        assert!(!result.passed());
        assert_eq!(result.total_count(), 0);
        assert!(result.diagnostics().contains("vitest: not found"));
    }

    #[test]
    fn test_clean_exit_without_results_is_not_a_pass() {
        let result = parse_test_output("nothing to see", "", true);
        assert!(!result.passed());
        assert!(result.diagnostics().contains("no test results"));
    }
}
