//! Runs Command
//!
//! Inspect recorded runs.
//!
//! Usage:
//!   verigen runs list [--project web] [--limit 20] [-f json]
//!   verigen runs show <run-id> [-f json]

use console::style;

use crate::cli::progress::format_duration_ms;
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, print_json};
use crate::storage::RunSummary;
use crate::types::Result;

pub fn list(ctx: &CommandContext, project: Option<&str>, limit: usize, format: &str) -> Result<()> {
    let runs = ctx.studio.list_runs(project, limit)?;

    if format == "json" {
        return print_json(&runs);
    }

    if runs.is_empty() {
        Output::new().info("No runs recorded.");
        return Ok(());
    }

    for run in &runs {
        println!("{}", format_summary(run));
    }
    Ok(())
}

fn format_summary(run: &RunSummary) -> String {
    let status = if run.error_message.is_some() {
        style("failed").red()
    } else if run.success {
        style("passed").green()
    } else if run.completed_at.is_some() {
        style("failing").yellow()
    } else {
        style("running").cyan()
    };

    let prompt: String = run.prompt.chars().take(48).collect();
    format!(
        "{}  {:<8} {:<10} repairs={} {}  {}",
        &run.id[..run.id.len().min(8)],
        status,
        run.stage.as_str(),
        run.repair_attempts,
        run.project_ref.as_deref().unwrap_or("-"),
        prompt
    )
}

pub fn show(ctx: &CommandContext, run_id: &str, format: &str) -> Result<()> {
    let run = ctx.studio.get_run(run_id)?;
    let db = ctx.studio.database();
    let history = db.stage_history(run_id)?;
    let observation = db.load_observation(run_id)?;

    if format == "json" {
        return print_json(&serde_json::json!({
            "run": run,
            "stages": history,
            "observation": observation,
        }));
    }

    let output = Output::new();
    output.section(&format!("Run {}", run.id));
    output.field("Prompt", &run.prompt);
    output.field("Project", run.project_ref.as_deref().unwrap_or("-"));
    output.field("Stage", run.stage.name());
    output.field("Success", run.success);
    output.field("Repairs", format!("{}/{}", run.repair_attempts, run.max_repair_attempts));
    if let Some(contract) = &run.contract {
        output.field("Contract", &contract.summary);
    }
    if let Some(result) = &run.last_result {
        output.field(
            "Tests",
            format!("{} passed, {} failed", result.passed_count(), result.failed_count()),
        );
    }
    if let Some(message) = &run.error_message {
        output.field("Error", message);
    }

    output.section("Stages");
    for record in &history {
        eprintln!(
            "  {} {:<10} repairs={}",
            style(&record.recorded_at).dim(),
            record.stage.as_str(),
            record.repair_attempts
        );
    }

    // In-flight runs have no final files yet
    output.section("Files");
    for path in run.latest_files().paths() {
        println!("{}", path);
    }

    if let Some(observation) = observation {
        output.section("Observation");
        output.field("Model", &observation.model);
        output.field("Latency", format_duration_ms(observation.latency_ms));
        output.field("Digest", &observation.files_digest);
        output.field("Diff", observation.diff.summary());
    }

    Ok(())
}
