//! Config Command
//!
//! Manage verigen configuration.
//!
//! Usage:
//!   verigen config show [-g] [-f json]
//!   verigen config path
//!   verigen config init [-g] [--force]

use std::path::Path;

use crate::cli::ui::Output;
use crate::cli::util::load_config;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Show configuration
pub fn show(config_path: Option<&Path>, global: bool, format: &str) -> Result<()> {
    if global {
        match ConfigLoader::global_config_path() {
            Some(global_path) if global_path.exists() => {
                let content = std::fs::read_to_string(&global_path)?;
                println!("# Global Config: {}\n", global_path.display());
                println!("{}", content);
            }
            Some(_) => {
                let output = Output::new();
                output.info("No global config found.");
                output.info("Run 'verigen config init --global' to create one.");
            }
            None => Output::new().warning("Cannot determine global config directory."),
        }
        return Ok(());
    }

    // Merged effective config
    let config = load_config(config_path)?;
    println!("{}", ConfigLoader::render(&config, format == "json")?);
    Ok(())
}

/// Show configuration paths
pub fn path() -> Result<()> {
    let describe = |path: &Path| {
        if path.exists() {
            format!("{} (exists)", path.display())
        } else {
            format!("{} (not found)", path.display())
        }
    };

    match ConfigLoader::global_config_path() {
        Some(global) => println!("Global:  {}", describe(&global)),
        None => println!("Global:  (unavailable)"),
    }
    println!("Project: {}", describe(&ConfigLoader::project_config_path()));
    Ok(())
}

/// Initialize global configuration
pub fn init_global(force: bool) -> Result<()> {
    let config_path = ConfigLoader::init_global(force)?;
    let output = Output::new();
    output.success("Initialized global configuration");
    output.field("Config", config_path.display());
    Ok(())
}

/// Initialize project configuration
pub fn init_project(force: bool) -> Result<()> {
    let config_path = ConfigLoader::init_project(force)?;
    let output = Output::new();
    output.success("Initialized project configuration");
    output.field("Directory", ConfigLoader::project_dir().display());
    output.field("Config", config_path.display());
    Ok(())
}
