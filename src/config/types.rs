//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/verigen/) and project (.verigen/) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{network, pipeline, retry, sandbox};
use crate::types::{Result, VerigenError};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Completion engine settings
    pub llm: LlmConfig,

    /// Generation pipeline settings
    pub pipeline: PipelineConfig,

    /// Sandbox executor settings
    pub sandbox: SandboxConfig,

    /// Plugin discovery and install settings
    pub plugins: PluginsConfig,

    /// Run recorder settings
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            sandbox: SandboxConfig::default(),
            plugins: PluginsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `VerigenError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(VerigenError::Config(format!(
                "LLM temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(VerigenError::Config(
                "LLM timeout_secs must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.llm.provider.as_str(), "offline" | "openai" | "ollama") {
            return Err(VerigenError::Config(format!(
                "Unknown LLM provider '{}'. Supported: offline, openai, ollama",
                self.llm.provider
            )));
        }

        if self.pipeline.stage_timeout_secs == 0 {
            return Err(VerigenError::Config(
                "pipeline.stage_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.sandbox.test_timeout_secs == 0 || self.sandbox.tool_timeout_secs == 0 {
            return Err(VerigenError::Config(
                "sandbox timeouts must be greater than 0".to_string(),
            ));
        }

        if let Some(cmd) = &self.sandbox.test_command
            && cmd.is_empty()
        {
            return Err(VerigenError::Config(
                "sandbox.test_command must name a program".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

/// Completion engine settings.
///
/// API keys are never serialized to output and are redacted in debug output.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Engine: "offline", "openai", "ollama"
    pub provider: String,

    /// Model name (engine-specific; empty means engine default)
    pub model: String,

    /// Custom API base URL
    pub api_base: Option<String>,

    /// API key; falls back to the engine's conventional env var
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Temperature (0.0 = deterministic)
    pub temperature: f32,

    /// Default maximum tokens per completion
    pub max_tokens: usize,

    /// Retries for retryable engine failures
    pub max_retries: u32,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "offline".to_string(),
            model: String::new(),
            api_base: None,
            api_key: None,
            timeout_secs: network::DEFAULT_TIMEOUT_SECS,
            temperature: 0.2,
            max_tokens: 4096,
            max_retries: retry::DEFAULT_MAX_RETRIES,
        }
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bound on Repair → Execute cycles
    pub max_repair_attempts: u32,

    /// Wall-clock budget for a single engine call
    pub stage_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: pipeline::DEFAULT_MAX_REPAIR_ATTEMPTS,
            stage_timeout_secs: pipeline::DEFAULT_STAGE_TIMEOUT_SECS,
        }
    }
}

// =============================================================================
// Sandbox Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Test runner argv, e.g. `["npx", "vitest", "run", "--reporter=json"]`.
    /// When unset, tests are counted and reported by the simulated runner.
    pub test_command: Option<Vec<String>>,

    /// Write vitest config, setup file and test devDependencies into the
    /// workspace before running the test command
    pub write_runner_config: bool,

    /// Test run wall-clock limit
    pub test_timeout_secs: u64,

    /// Plugin tool wall-clock limit (manifest `timeout_ms` overrides)
    pub tool_timeout_secs: u64,

    /// Maximum stdout/stderr bytes kept for diagnostics
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            test_command: None,
            write_runner_config: true,
            test_timeout_secs: sandbox::DEFAULT_TEST_TIMEOUT_SECS,
            tool_timeout_secs: sandbox::DEFAULT_TOOL_TIMEOUT_SECS,
            max_output_bytes: sandbox::MAX_OUTPUT_BYTES,
        }
    }
}

// =============================================================================
// Plugins Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Directories scanned for `<name>/plugin.json`
    pub directories: Vec<PathBuf>,

    /// Where `plugin install` clones repositories
    pub install_dir: PathBuf,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        let install_dir = PathBuf::from(".verigen/plugins");
        Self {
            directories: vec![install_dir.clone()],
            install_dir,
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(".verigen/runs.db"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.max_repair_attempts, 2);
        assert_eq!(config.llm.provider, "offline");
        assert!(config.sandbox.test_command.is_none());
    }

    #[test]
    fn test_invalid_temperature() {
        let mut config = Config::default();
        config.llm.temperature = 3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_provider() {
        let mut config = Config::default();
        config.llm.provider = "carrier-pigeon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_test_command() {
        let mut config = Config::default();
        config.sandbox.test_command = Some(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_redacted_and_not_serialized() {
        let config = LlmConfig {
            api_key: Some("sk-secret".to_string()),
            ..LlmConfig::default()
        };
        assert!(!format!("{:?}", config).contains("sk-secret"));
        let toml = toml::to_string(&config).unwrap();
        assert!(!toml.contains("sk-secret"));
    }
}
