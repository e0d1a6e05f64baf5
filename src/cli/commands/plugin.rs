//! Plugin Command
//!
//! Manage installed plugins.
//!
//! Usage:
//!   verigen plugin scan
//!   verigen plugin install https://github.com/org/verigen-upper.git
//!   verigen plugin remove upper
//!   verigen plugin enable|disable upper

use std::collections::BTreeSet;

use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::types::Result;

pub async fn scan(ctx: &CommandContext) -> Result<()> {
    let count = ctx.studio.scan_plugins().await?;
    Output::new().success(&format!(
        "Registered {} plugin manifests ({} tools in catalog)",
        count,
        ctx.studio.tool_catalog().len()
    ));
    Ok(())
}

pub async fn install(ctx: &CommandContext, source: &str) -> Result<()> {
    let output = Output::new();
    output.info(&format!("Installing plugin from {}", source));

    let manifest = ctx.studio.install_plugin(source).await?;
    output.success(&format!("Installed {} v{}", manifest.name, manifest.version));
    if let Some(dir) = &manifest.directory {
        output.field("Directory", dir.display());
    }
    output.field("Inputs", join(&manifest.inputs));
    output.field("Outputs", join(&manifest.outputs));
    Ok(())
}

fn join(kinds: &BTreeSet<String>) -> String {
    kinds.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

pub async fn remove(ctx: &CommandContext, name: &str) -> Result<()> {
    ctx.studio.remove_plugin(name).await?;
    Output::new().success(&format!("Removed {}", name));
    Ok(())
}

pub async fn set_enabled(ctx: &CommandContext, name: &str, enabled: bool) -> Result<()> {
    ctx.studio.set_plugin_enabled(name, enabled).await?;
    let state = if enabled { "Enabled" } else { "Disabled" };
    Output::new().success(&format!("{} {}", state, name));
    Ok(())
}
