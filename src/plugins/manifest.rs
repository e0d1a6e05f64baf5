//! Manifest Loading
//!
//! Reads `plugin.json` / `plugin.yaml` files and checks them before they
//! reach the catalog. Required fields are checked on the raw document so the
//! error names the missing field instead of a serde position.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::constants::plugins::MANIFEST_FILES;
use crate::types::{PluginManifest, Result, VerigenError};

pub const REQUIRED_FIELDS: &[&str] = &["name", "version", "description", "inputs", "outputs", "command"];

/// First manifest file present in a plugin directory
pub fn find_manifest(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Load and validate a manifest file. The manifest's directory is recorded
/// so relative commands resolve against it; `verified` is always reset
/// since only a self-test may set it.
pub fn load_manifest(path: &Path) -> Result<PluginManifest> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path)
        .map_err(|e| VerigenError::plugin_validation(&display, format!("cannot read manifest: {}", e)))?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    let mut manifest = parse_manifest(&text, is_yaml, &display)?;

    manifest.directory = path.parent().map(Path::to_path_buf);
    manifest.verified = false;
    Ok(manifest)
}

pub fn parse_manifest(text: &str, is_yaml: bool, origin: &str) -> Result<PluginManifest> {
    let invalid = |message: String| VerigenError::plugin_validation(origin, message);

    let value: Value = if is_yaml {
        serde_yaml::from_str(text).map_err(|e| invalid(format!("invalid YAML: {}", e)))?
    } else {
        serde_json::from_str(text).map_err(|e| invalid(format!("invalid JSON: {}", e)))?
    };

    let Some(object) = value.as_object() else {
        return Err(invalid("manifest must be an object".to_string()));
    };
    if let Some(missing) = REQUIRED_FIELDS
        .iter()
        .find(|field| object.get(**field).is_none_or(Value::is_null))
    {
        return Err(invalid(format!("missing required field '{}'", missing)));
    }

    let manifest: PluginManifest =
        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;
    validate_name(&manifest.name).map_err(invalid)?;
    if manifest.command.is_empty() {
        return Err(invalid("field 'command' is empty".to_string()));
    }
    Ok(manifest)
}

/// Names double as directory names and CLI arguments
pub fn validate_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("field 'name' is empty".to_string());
    }
    if name.starts_with('.')
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(format!(
            "invalid plugin name '{}': use letters, digits, '-', '_' or '.'",
            name
        ));
    }
    Ok(())
}
