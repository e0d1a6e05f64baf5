//! Run Progress Rendering
//!
//! Turns the run's event stream into console lines for interactive use.
//! With `--json` the CLI prints raw NDJSON instead and this module is unused.

use console::style;

use crate::types::{StreamEvent, VerificationResult};

/// Stateless formatter for [`StreamEvent`]s
pub struct ConsoleRenderer {
    show_reasoning: bool,
    show_files: bool,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self {
            show_reasoning: true,
            show_files: true,
        }
    }

    pub fn with_reasoning(mut self, show: bool) -> Self {
        self.show_reasoning = show;
        self
    }

    pub fn with_files(mut self, show: bool) -> Self {
        self.show_files = show;
        self
    }

    /// Console line for `event`, or `None` when it is not displayed
    pub fn render(&self, event: &StreamEvent) -> Option<String> {
        match event {
            StreamEvent::StageStarted { stage } => {
                Some(format!("{} {}", style("▶").cyan(), style(stage.name()).bold()))
            }
            StreamEvent::BuildProgress { progress_pct, .. } => Some(format!(
                "  {} {:>3}%",
                render_progress_bar(usize::from(*progress_pct), 100, 30),
                progress_pct
            )),
            StreamEvent::ReasoningStep { content, .. } if self.show_reasoning => {
                Some(format!("  {} {}", style("·").dim(), content))
            }
            StreamEvent::FileClosed { filename, .. } if self.show_files => {
                Some(format!("  {} {}", style("+").green(), filename))
            }
            StreamEvent::TestResult { test_results, .. } => Some(render_result(test_results)),
            StreamEvent::BuildOk { content, .. } => Some(format!("{} {}", style("✓").green(), content)),
            StreamEvent::BuildError { stage, content } => Some(format!(
                "{} {} failed: {}",
                style("✗").red(),
                stage.name(),
                content
            )),
            StreamEvent::Error { content } => Some(format!("{} {}", style("⚠").yellow(), content)),
            StreamEvent::PluginResult {
                plugin_name,
                files,
                checksum,
            } => Some(format!(
                "{} {} produced {} files ({})",
                style("✓").green(),
                plugin_name,
                files.len(),
                &checksum[..checksum.len().min(12)]
            )),
            _ => None,
        }
    }
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn render_result(result: &VerificationResult) -> String {
    if result.timed_out() {
        return format!("  {} tests timed out", style("⏱").yellow());
    }
    let marker = if result.passed() {
        style("✓").green()
    } else {
        style("✗").red()
    };
    let mut line = format!(
        "  {} {}/{} tests passed in {}",
        marker,
        result.passed_count(),
        result.total_count(),
        format_duration_ms(result.duration_ms())
    );
    for name in result.failing_cases() {
        line.push_str(&format!("\n      {} {}", style("✗").red(), name));
    }
    line
}

/// Render a simple progress bar
fn render_progress_bar(completed: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return format!("[{}]", " ".repeat(width));
    }

    let progress = (completed as f32 / total as f32).min(1.0);
    let filled = (progress * width as f32) as usize;
    let empty = width.saturating_sub(filled);

    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format a millisecond duration as a human-readable string
pub fn format_duration_ms(ms: u64) -> String {
    let secs = ms / 1000;
    if secs == 0 {
        format!("{}ms", ms)
    } else if secs < 60 {
        format!("{}.{}s", secs, (ms % 1000) / 100)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaseResult, Stage};

    #[test]
    fn test_progress_bar_render() {
        assert_eq!(render_progress_bar(0, 10, 10), "[░░░░░░░░░░]");
        assert_eq!(render_progress_bar(5, 10, 10), "[█████░░░░░]");
        assert_eq!(render_progress_bar(10, 10, 10), "[██████████]");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration_ms(250), "250ms");
        assert_eq!(format_duration_ms(1500), "1.5s");
        assert_eq!(format_duration_ms(90_000), "1m 30s");
        assert_eq!(format_duration_ms(3_700_000), "1h 1m");
    }

    #[test]
    fn test_hidden_events() {
        let renderer = ConsoleRenderer::new().with_reasoning(false).with_files(false);
        let reasoning = StreamEvent::ReasoningStep {
            stage: Stage::Interpret,
            content: "thinking".into(),
        };
        let token = StreamEvent::Token {
            stage: Stage::Scaffold,
            filename: "src/A.tsx".into(),
            content: "x".into(),
        };
        assert!(renderer.render(&reasoning).is_none());
        assert!(renderer.render(&token).is_none());
        assert!(ConsoleRenderer::new().render(&reasoning).is_some());
    }

    #[test]
    fn test_failing_cases_listed() {
        let result = VerificationResult::from_cases(
            vec![CaseResult::passed("renders"), CaseResult::failed("clicks")],
            "",
        );
        let line = ConsoleRenderer::new()
            .render(&StreamEvent::TestResult {
                stage: Stage::Execute,
                test_results: result,
            })
            .unwrap();
        assert!(line.contains("1/2 tests passed"));
        assert!(line.contains("clicks"));
    }
}
