//! Tools Command
//!
//! Browse and invoke the tool catalog.
//!
//! Usage:
//!   verigen tools list [-f json]
//!   verigen tools find "format typescript" [-i typescript]
//!   verigen tools exec prettier src/App.tsx [--out ./formatted]

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use console::style;

use crate::cli::commands::run::write_files;
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, print_json, print_ndjson, read_files};
use crate::types::{Result, ToolInfo, kinds_of};

pub fn list(ctx: &CommandContext, format: &str) -> Result<()> {
    let catalog = ctx.studio.tool_catalog();
    if format == "json" {
        return print_json(&catalog);
    }
    for tool in &catalog {
        println!("{}", format_tool(tool));
    }
    Ok(())
}

fn format_tool(tool: &ToolInfo) -> String {
    let flags = match (tool.enabled, tool.verified) {
        (false, _) => style("disabled").red(),
        (true, true) => style("verified").green(),
        (true, false) => style("unverified").yellow(),
    };
    format!(
        "{:<16} {:<10} [{}] -> [{}] ~{}ms  {}",
        style(&tool.name).bold(),
        flags,
        tool.input_kinds.join(","),
        tool.output_kinds.join(","),
        tool.cost_estimate_ms,
        tool.description
    )
}

/// Best tool for `goal` over the given input kinds
pub fn find(ctx: &CommandContext, goal: &str, inputs: &[String], format: &str) -> Result<()> {
    let kinds: BTreeSet<String> = inputs.iter().map(|k| k.to_lowercase()).collect();
    let found = ctx.studio.find_tool(goal, &kinds);

    if format == "json" {
        return print_json(&found);
    }
    match found {
        Some(tool) => println!("{}", format_tool(&tool)),
        None => Output::new().warning("No tool matches that goal"),
    }
    Ok(())
}

/// Run a tool over files read from disk, printing the `plugin_result` event
pub async fn exec(ctx: &CommandContext, name: &str, paths: &[PathBuf], out: Option<&Path>) -> Result<()> {
    let files = read_files(paths)?;
    tracing::debug!("Executing {} over kinds {:?}", name, kinds_of(&files));

    let output = ctx.studio.execute_tool(name, &files).await?;
    if let Some(dir) = out {
        write_files(dir, &output.files)?;
        Output::new().success(&format!("Wrote {} files to {}", output.files.len(), dir.display()));
    }
    print_ndjson(&output.to_event())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tool() {
        let tool = ToolInfo {
            name: "prettier".into(),
            description: "Format source".into(),
            input_kinds: vec!["typescript".into(), "javascript".into()],
            output_kinds: vec!["typescript".into()],
            cost_estimate_ms: 400,
            enabled: true,
            verified: true,
        };
        let line = format_tool(&tool);
        assert!(line.contains("[typescript,javascript]"));
        assert!(line.contains("~400ms"));
    }
}
