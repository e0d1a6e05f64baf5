//! Run Command
//!
//! Drive one generation run and relay its events.
//!
//! Usage:
//!   verigen run "A todo list with filters" [--project web] [--skip-tests]
//!   verigen run "..." --json          # NDJSON events on stdout
//!   verigen run "..." --out ./app     # write the final files

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::cli::progress::{ConsoleRenderer, format_duration_ms};
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, print_ndjson};
use crate::types::{FileSet, Result, Run, RunRequest, VerigenError};

pub struct RunOptions {
    pub prompt: String,
    pub project: Option<String>,
    pub skip_tests: bool,
    pub max_repairs: Option<u32>,
    pub out: Option<PathBuf>,
    pub json: bool,
}

/// Returns whether the run succeeded
pub async fn run(ctx: &CommandContext, options: RunOptions) -> Result<bool> {
    let mut request = RunRequest::new(options.prompt).skip_tests(options.skip_tests);
    if let Some(project) = options.project {
        request = request.project(project);
    }
    if let Some(max) = options.max_repairs {
        request = request.max_repairs(max);
    }

    let mut handle = ctx.studio.start_run(request);
    info!("Started run {}", handle.run_id);

    let renderer = ConsoleRenderer::new();
    let cancel = handle.cancel.clone();
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = handle.events.recv() => {
                let Some(event) = event else { break };
                if options.json {
                    print_ndjson(&event)?;
                } else if let Some(line) = renderer.render(&event) {
                    eprintln!("{}", line);
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("Interrupted; cancelling run {}", handle.run_id);
                interrupted = true;
                cancel.cancel();
            }
        }
    }

    let run = handle.wait().await?;

    if let Some(dir) = &options.out
        && !run.final_files.is_empty()
    {
        write_files(dir, &run.final_files)?;
        info!("Wrote {} files to {}", run.final_files.len(), dir.display());
    }

    if options.json {
        print_ndjson(&summary(&run))?;
    } else {
        print_summary(&run, options.out.as_deref());
    }

    Ok(run.success)
}

fn summary(run: &Run) -> serde_json::Value {
    serde_json::json!({
        "type": "summary",
        "runId": run.id,
        "success": run.success,
        "stage": run.stage,
        "repairAttempts": run.repair_attempts,
        "files": run.final_files.paths().collect::<Vec<_>>(),
        "latencyMs": run.latency_ms(),
        "error": run.error_message,
    })
}

fn print_summary(run: &Run, out: Option<&Path>) {
    let output = Output::new();
    output.section("Run Summary");
    output.field("Run", &run.id);
    output.field("Stage", run.stage.name());
    output.field("Repairs", format!("{}/{}", run.repair_attempts, run.max_repair_attempts));
    output.field("Files", run.final_files.len());
    if let Some(result) = &run.last_result {
        output.field(
            "Tests",
            format!("{} passed, {} failed", result.passed_count(), result.failed_count()),
        );
    }
    output.field("Latency", format_duration_ms(run.latency_ms()));
    if let Some(dir) = out {
        output.field("Output", dir.display());
    }

    match (&run.error_message, run.success) {
        (Some(message), _) => output.error(message),
        (None, true) => output.success("Generation succeeded"),
        (None, false) => output.warning("Generation finished with failing tests"),
    }
}

/// Write `files` under `dir`, creating parent directories
pub fn write_files(dir: &Path, files: &FileSet) -> Result<()> {
    files.validate_paths()?;
    for (path, content) in files.iter() {
        let target = dir.join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, content).map_err(|e| {
            VerigenError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {}", target.display(), e),
            ))
        })?;
    }
    Ok(())
}
