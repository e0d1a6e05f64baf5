//! Plugin Manifest and Execution Record Types
//!
//! A manifest describes one tool: the file kinds it accepts and produces,
//! how to invoke it, and what it costs. Kinds are language-level names
//! (`typescript`, `css`, ...) derived from file extensions by [`kind_of_path`].

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::files::{FileSet, extension_of};
use crate::constants::plugins::DEFAULT_COST_MS;

// =============================================================================
// Manifest
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    pub inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
    /// Argument vector; a manifest may also give a single whitespace-separated
    /// string. An argument equal to `{files}` expands to the input paths.
    #[serde(deserialize_with = "deserialize_command")]
    pub command: Vec<String>,
    #[serde(default = "default_cost_ms")]
    pub estimated_cost_ms: u64,
    #[serde(default)]
    pub estimated_tokens: u64,
    /// Overrides the sandbox tool timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Set only by a successful compatibility self-test
    #[serde(default)]
    pub verified: bool,
    /// Directory the manifest was loaded from; relative commands resolve here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
}

fn default_cost_ms() -> u64 {
    DEFAULT_COST_MS
}

fn default_true() -> bool {
    true
}

fn deserialize_command<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCommand {
        Line(String),
        Argv(Vec<String>),
    }

    Ok(match RawCommand::deserialize(deserializer)? {
        RawCommand::Line(line) => line.split_whitespace().map(str::to_string).collect(),
        RawCommand::Argv(argv) => argv,
    })
}

impl PluginManifest {
    /// Whether the tool accepts any of `kinds`
    pub fn accepts_any<'a>(&self, kinds: impl IntoIterator<Item = &'a str>) -> bool {
        kinds.into_iter().any(|k| self.inputs.contains(k))
    }

    pub fn catalog_entry(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            input_kinds: self.inputs.iter().cloned().collect(),
            output_kinds: self.outputs.iter().cloned().collect(),
            cost_estimate_ms: self.estimated_cost_ms,
            enabled: self.enabled,
            verified: self.verified,
        }
    }
}

/// Public catalog view of a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub input_kinds: Vec<String>,
    pub output_kinds: Vec<String>,
    pub cost_estimate_ms: u64,
    pub enabled: bool,
    pub verified: bool,
}

// =============================================================================
// Execution Record
// =============================================================================

/// One tool invocation. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginExecution {
    pub id: String,
    pub plugin_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub input_files: FileSet,
    pub output_files: FileSet,
    pub success: bool,
    pub error_message: Option<String>,
    /// Aggregate SHA-256 over the output files; empty on failure
    pub checksum: String,
}

impl PluginExecution {
    pub fn succeeded(
        plugin_name: impl Into<String>,
        started_at: DateTime<Utc>,
        input_files: FileSet,
        output_files: FileSet,
        checksum: impl Into<String>,
    ) -> Self {
        Self::finish(plugin_name.into(), started_at, input_files, output_files, None, checksum.into())
    }

    pub fn failed(
        plugin_name: impl Into<String>,
        started_at: DateTime<Utc>,
        input_files: FileSet,
        error: impl Into<String>,
    ) -> Self {
        Self::finish(
            plugin_name.into(),
            started_at,
            input_files,
            FileSet::new(),
            Some(error.into()),
            String::new(),
        )
    }

    fn finish(
        plugin_name: String,
        started_at: DateTime<Utc>,
        input_files: FileSet,
        output_files: FileSet,
        error_message: Option<String>,
        checksum: String,
    ) -> Self {
        let completed_at = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            plugin_name,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
            input_files,
            output_files,
            success: error_message.is_none(),
            error_message,
            checksum,
        }
    }
}

// =============================================================================
// File Kinds
// =============================================================================

/// Map a path to the file kind used in manifests
pub fn kind_of_path(path: &str) -> Option<String> {
    let ext = extension_of(path)?;
    let kind = match ext.as_str() {
        "ts" | "tsx" | "mts" | "cts" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "css" | "scss" | "sass" | "less" => "css",
        "html" | "htm" => "html",
        "json" => "json",
        "md" | "markdown" => "markdown",
        "py" => "python",
        "rs" => "rust",
        other => other,
    };
    Some(kind.to_string())
}

/// Distinct kinds present in a file set
pub fn kinds_of(files: &FileSet) -> BTreeSet<String> {
    files.paths().filter_map(kind_of_path).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_defaults_and_string_command() {
        let manifest: PluginManifest = serde_json::from_str(
            r#"{"name": "fmt", "version": "1.0.0", "description": "Formatter",
                "inputs": ["typescript"], "outputs": ["typescript"],
                "command": "prettier --write {files}"}"#,
        )
        .unwrap();
        assert_eq!(manifest.command, vec!["prettier", "--write", "{files}"]);
        assert_eq!(manifest.estimated_cost_ms, DEFAULT_COST_MS);
        assert_eq!(manifest.estimated_tokens, 0);
        assert!(manifest.enabled);
        assert!(!manifest.verified);
    }

    #[test]
    fn test_manifest_argv_command() {
        let manifest: PluginManifest = serde_yaml::from_str(
            "name: up\nversion: '0.1'\ndescription: Uppercase\ninputs: [txt]\noutputs: [txt]\ncommand: [sh, run.sh]\n",
        )
        .unwrap();
        assert_eq!(manifest.command, vec!["sh", "run.sh"]);
    }

    #[test]
    fn test_kind_of_path() {
        assert_eq!(kind_of_path("src/App.tsx").as_deref(), Some("typescript"));
        assert_eq!(kind_of_path("index.mjs").as_deref(), Some("javascript"));
        assert_eq!(kind_of_path("styles.css").as_deref(), Some("css"));
        assert_eq!(kind_of_path("notes.txt").as_deref(), Some("txt"));
        assert_eq!(kind_of_path("Makefile"), None);
    }

    #[test]
    fn test_failed_execution_has_no_outputs() {
        let exec = PluginExecution::failed("fmt", Utc::now(), FileSet::single("a.ts", "x"), "boom");
        assert!(!exec.success);
        assert!(exec.output_files.is_empty());
        assert!(exec.checksum.is_empty());
        assert_eq!(exec.error_message.as_deref(), Some("boom"));
    }
}
