//! CLI Common Utilities
//!
//! Shared configuration loading and context setup for command handlers.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{Config, ConfigLoader};
use crate::studio::Studio;
use crate::types::{FileSet, Result, VerigenError, validate_relative_path};

/// Command execution context
///
/// Loaded configuration plus an open [`Studio`]. Commands that only read
/// configuration use [`load_config`] instead.
pub struct CommandContext {
    pub config: Config,
    pub studio: Studio,
}

impl CommandContext {
    /// Load configuration and open storage, plugins and the engine
    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let studio = Studio::open(&config).await?;
        Ok(Self { config, studio })
    }
}

/// Configuration from an explicit file, or the layered default chain
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(VerigenError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            ConfigLoader::load_from_file(path)
        }
        None => ConfigLoader::load(),
    }
}

/// Read files from disk into a [`FileSet`] keyed by the given relative paths
pub fn read_files(paths: &[PathBuf]) -> Result<FileSet> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let key = path.to_string_lossy().replace('\\', "/");
        let key = key.trim_start_matches("./").to_string();
        validate_relative_path(&key)?;
        let content = std::fs::read_to_string(path)?;
        files.push((key, content));
    }
    Ok(files.into_iter().collect())
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a value as one compact JSON line on stdout
pub fn print_ndjson<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_files_keys_by_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.ts");
        std::fs::write(&file, "let a = 1;").unwrap();

        // Absolute paths are rejected as FileSet keys
        assert!(read_files(std::slice::from_ref(&file)).is_err());

        let missing = PathBuf::from("./definitely/missing.ts");
        assert!(matches!(read_files(&[missing]).unwrap_err(), VerigenError::Io(_)));
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_config(Some(Path::new("/nonexistent/verigen.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
