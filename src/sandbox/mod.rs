//! Sandbox Executor
//!
//! Runs tools and test suites against file sets in isolation.
//!
//! ## Targets
//!
//! - **Named tools**: built-in transforms or registered plugin commands,
//!   resolved through the [`PluginRegistry`]. Plugin commands are untrusted;
//!   they run in a fresh workspace with a wall-clock limit and their outputs
//!   are checksummed.
//! - **Test runner**: the configured `sandbox.test_command`, or a simulated
//!   runner when none is configured. Implements [`TestRunner`] for the
//!   pipeline's Execute stage.
//!
//! Every call gets its own [`Workspace`]; concurrent calls never share a
//! directory, even when their file names collide.

pub mod builtin;
mod process;
mod report;
mod runner;
mod workspace;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

pub use builtin::BuiltinTool;
pub use process::{CommandOutput, CommandSpec, run_command};
pub use report::parse_test_output;
pub use runner::{SharedTestRunner, TestRunner, simulate, write_runner_config};
pub use workspace::Workspace;

use crate::config::SandboxConfig;
use crate::plugins::{PluginRegistry, Tool, ToolKind};
use crate::storage::SharedRecorder;
use crate::types::{FileSet, PluginExecution, Result, StreamEvent, VerificationResult, VerigenError};

/// Manifest argument replaced by the input file paths
const FILES_PLACEHOLDER: &str = "{files}";

/// Result of one tool invocation
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub files: FileSet,
    /// SHA-256 per output file, hex encoded
    pub checksums: BTreeMap<String, String>,
    /// Aggregate checksum over the whole output set
    pub checksum: String,
    pub execution: PluginExecution,
}

impl ToolOutput {
    pub fn to_event(&self) -> StreamEvent {
        StreamEvent::PluginResult {
            plugin_name: self.execution.plugin_name.clone(),
            files: self.files.clone(),
            checksum: self.checksum.clone(),
        }
    }
}

pub struct SandboxExecutor {
    registry: Arc<PluginRegistry>,
    config: SandboxConfig,
    recorder: Option<SharedRecorder>,
}

impl SandboxExecutor {
    pub fn new(registry: Arc<PluginRegistry>, config: SandboxConfig) -> Self {
        Self {
            registry,
            config,
            recorder: None,
        }
    }

    /// Persist an execution record for every tool call
    pub fn with_recorder(mut self, recorder: SharedRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Run a named tool against `files`
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn execute(&self, tool_name: &str, files: &FileSet) -> Result<ToolOutput> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| VerigenError::UnknownTool(tool_name.to_string()))?;
        if !tool.manifest.enabled {
            return Err(VerigenError::sandbox_failed(tool_name, "tool is disabled"));
        }

        let started_at = Utc::now();
        let result = invoke_tool(&tool, files, &self.config).await;

        let execution = match &result {
            Ok(outputs) => PluginExecution::succeeded(
                tool_name,
                started_at,
                files.clone(),
                outputs.clone(),
                outputs.digest(),
            ),
            Err(e) => PluginExecution::failed(tool_name, started_at, files.clone(), e.to_string()),
        };
        self.record(&execution).await;

        let outputs = result?;
        info!(
            "Tool {} produced {} files in {}ms",
            tool_name,
            outputs.len(),
            execution.duration_ms
        );

        Ok(ToolOutput {
            checksums: file_checksums(&outputs),
            checksum: execution.checksum.clone(),
            files: outputs,
            execution,
        })
    }

    async fn record(&self, execution: &PluginExecution) {
        if let Some(recorder) = &self.recorder
            && let Err(e) = recorder.record_plugin_execution(execution).await
        {
            warn!("Failed to record execution of {}: {}", execution.plugin_name, e);
        }
    }
}

#[async_trait]
impl TestRunner for SandboxExecutor {
    async fn run_tests(&self, files: &FileSet, tests: &FileSet) -> Result<VerificationResult> {
        let Some(command) = &self.config.test_command else {
            debug!("No test command configured; simulating {} test files", tests.len());
            return Ok(simulate(tests));
        };

        let started = Instant::now();
        let workspace = Workspace::create()?;
        let all = files.union(tests);
        workspace.materialize(&all)?;
        if self.config.write_runner_config {
            write_runner_config(&workspace, &all)?;
        }

        let limit = Duration::from_secs(self.config.test_timeout_secs);
        let output = run_command(CommandSpec {
            tool: "test-runner",
            argv: command,
            cwd: workspace.path(),
            envs: vec![("VERIGEN_WORKSPACE", workspace.path().display().to_string())],
            limit,
            max_output_bytes: self.config.max_output_bytes,
        })
        .await;

        let elapsed = started.elapsed().as_millis() as u64;
        match output {
            Ok(out) => Ok(parse_test_output(&out.stdout, &out.stderr, out.success).with_duration_ms(elapsed)),
            Err(VerigenError::SandboxTimeout { .. }) => {
                warn!("Test run exceeded {:?}", limit);
                Ok(VerificationResult::timeout().with_duration_ms(elapsed))
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        match self.config.test_command {
            Some(_) => "command",
            None => "simulated",
        }
    }
}

/// Run one tool without touching the registry or recorder. Plugin install
/// uses this for its self-test before the tool is visible to callers.
pub(crate) async fn invoke_tool(tool: &Tool, files: &FileSet, config: &SandboxConfig) -> Result<FileSet> {
    files.validate_paths()?;

    let manifest = &tool.manifest;
    match tool.kind {
        ToolKind::Builtin(builtin) => Ok(builtin.apply(files)),
        ToolKind::Command => {
            let workspace = Workspace::create()?;
            workspace.materialize(files)?;

            let argv = expand_argv(&manifest.command, manifest.directory.as_deref(), files);
            let mut envs = vec![("VERIGEN_WORKSPACE", workspace.path().display().to_string())];
            if let Some(dir) = &manifest.directory {
                envs.push(("VERIGEN_PLUGIN_DIR", dir.display().to_string()));
            }
            let limit = manifest
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| Duration::from_secs(config.tool_timeout_secs));

            let output = run_command(CommandSpec {
                tool: &manifest.name,
                argv: &argv,
                cwd: workspace.path(),
                envs,
                limit,
                max_output_bytes: config.max_output_bytes,
            })
            .await?;

            if !output.success {
                return Err(VerigenError::sandbox_failed(&manifest.name, output.failure_message()));
            }
            workspace.collect()
        }
    }
}

/// Expand `{files}` and resolve a path-like program against the plugin
/// directory. Bare program names are left for `PATH` lookup.
fn expand_argv(command: &[String], plugin_dir: Option<&Path>, files: &FileSet) -> Vec<String> {
    let mut argv = Vec::with_capacity(command.len() + files.len());
    for (i, arg) in command.iter().enumerate() {
        if arg == FILES_PLACEHOLDER {
            argv.extend(files.paths().map(str::to_string));
            continue;
        }
        match plugin_dir {
            Some(dir) if i == 0 && arg.contains('/') && Path::new(arg).is_relative() => {
                argv.push(dir.join(arg).display().to_string());
            }
            _ => argv.push(arg.clone()),
        }
    }
    argv
}

/// Per-file SHA-256 of content
pub fn file_checksums(files: &FileSet) -> BTreeMap<String, String> {
    files
        .iter()
        .map(|(path, content)| (path.to_string(), hex::encode(Sha256::digest(content.as_bytes()))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PluginsConfig, SandboxConfig};
    use crate::storage::Database;
    use crate::types::PluginManifest;

    fn registry() -> Arc<PluginRegistry> {
        let registry = PluginRegistry::new(PluginsConfig::default(), SandboxConfig::default(), None);
        registry.register_builtins();
        Arc::new(registry)
    }

    fn command_manifest(name: &str, command: &[&str]) -> PluginManifest {
        let mut manifest = BuiltinTool::Passthrough.manifest();
        manifest.name = name.to_string();
        manifest.command = command.iter().map(|s| s.to_string()).collect();
        manifest.verified = false;
        manifest
    }

    #[tokio::test]
    async fn test_execute_builtin_with_checksums() {
        let executor = SandboxExecutor::new(registry(), SandboxConfig::default());
        let files = FileSet::single("src/a.ts", "var x = 1;");
        let out = executor.execute("eslint", &files).await.unwrap();

        assert_eq!(out.files.get("src/a.ts"), Some("const x = 1;"));
        assert_eq!(out.checksum, out.files.digest());
        assert_eq!(out.checksums.len(), 1);
        assert_eq!(out.checksums["src/a.ts"].len(), 64);
        assert!(out.execution.success);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let executor = SandboxExecutor::new(registry(), SandboxConfig::default());
        let err = executor.execute("gofmt", &FileSet::new()).await.unwrap_err();
        assert!(matches!(err, VerigenError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let executor = SandboxExecutor::new(registry(), SandboxConfig::default());
        let files = FileSet::single("/etc/passwd", "x");
        let err = executor.execute("passthrough", &files).await.unwrap_err();
        assert!(matches!(err, VerigenError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn test_executions_are_recorded() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.initialize().unwrap();
        let executor =
            SandboxExecutor::new(registry(), SandboxConfig::default()).with_recorder(db.clone());
        executor
            .execute("prettier", &FileSet::single("a.ts", "a;"))
            .await
            .unwrap();
        let _ = executor.execute("missing", &FileSet::new()).await;

        let records = db.list_plugin_executions("prettier", 10).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
    }

    #[test]
    fn test_expand_argv() {
        let files: FileSet = [
            ("a.ts".to_string(), String::new()),
            ("b.ts".to_string(), String::new()),
        ]
        .into_iter()
        .collect();
        let command: Vec<String> = ["bin/fmt", "--write", "{files}"].iter().map(|s| s.to_string()).collect();

        let argv = expand_argv(&command, Some(Path::new("/plugins/fmt")), &files);
        assert_eq!(argv, vec!["/plugins/fmt/bin/fmt", "--write", "a.ts", "b.ts"]);

        let argv = expand_argv(&command[1..], Some(Path::new("/plugins/fmt")), &files);
        assert_eq!(argv, vec!["--write", "a.ts", "b.ts"]);
    }

    #[tokio::test]
    async fn test_simulated_runner_when_no_command() {
        let executor = SandboxExecutor::new(registry(), SandboxConfig::default());
        let tests = FileSet::single("a.test.ts", "it('works', () => {});");
        let result = executor.run_tests(&FileSet::new(), &tests).await.unwrap();
        assert!(result.passed());
        assert_eq!(executor.name(), "simulated");
    }

    #[cfg(unix)]
    mod unix {
        use super::*;

        #[tokio::test]
        async fn test_concurrent_executions_are_isolated() {
            let registry = registry();
            registry
                .register_manifest(command_manifest(
                    "copy",
                    &["sh", "-c", "sleep 0.2; cat input.txt > output.txt"],
                ))
                .await
                .unwrap();
            let executor = Arc::new(SandboxExecutor::new(registry, SandboxConfig::default()));

            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let executor = executor.clone();
                    tokio::spawn(async move {
                        let files = FileSet::single("input.txt", format!("call-{}", i));
                        (i, executor.execute("copy", &files).await)
                    })
                })
                .collect();

            for handle in handles {
                let (i, result) = handle.await.unwrap();
                let out = result.unwrap();
                assert_eq!(out.files.get("input.txt"), Some(format!("call-{}", i).as_str()));
                assert_eq!(out.files.get("output.txt"), Some(format!("call-{}", i).as_str()));
            }
        }

        #[tokio::test]
        async fn test_failing_plugin_surfaces_execution_error() {
            let registry = registry();
            registry
                .register_manifest(command_manifest("broken", &["sh", "-c", "echo nope >&2; exit 1"]))
                .await
                .unwrap();
            let executor = SandboxExecutor::new(registry, SandboxConfig::default());
            let err = executor.execute("broken", &FileSet::new()).await.unwrap_err();
            match err {
                VerigenError::SandboxExecutionFailed { tool, message } => {
                    assert_eq!(tool, "broken");
                    assert_eq!(message, "nope");
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_plugin_timeout() {
            let registry = registry();
            let mut manifest = command_manifest("slow", &["sleep", "5"]);
            manifest.timeout_ms = Some(50);
            registry.register_manifest(manifest).await.unwrap();
            let executor = SandboxExecutor::new(registry, SandboxConfig::default());
            let err = executor.execute("slow", &FileSet::new()).await.unwrap_err();
            assert!(matches!(err, VerigenError::SandboxTimeout { .. }));
        }

        #[tokio::test]
        async fn test_command_runner_parses_output() {
            let config = SandboxConfig {
                test_command: Some(vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "test -f vitest.config.ts && echo 'ok 1 - renders' && echo 'not ok 2 - clicks'".to_string(),
                ]),
                ..SandboxConfig::default()
            };
            let executor = SandboxExecutor::new(registry(), config);
            let result = executor
                .run_tests(&FileSet::single("src/a.ts", "x"), &FileSet::single("src/a.test.ts", "y"))
                .await
                .unwrap();
            assert_eq!(result.passed_count(), 1);
            assert_eq!(result.failed_count(), 1);
        }

        #[tokio::test]
        async fn test_command_runner_timeout_is_a_failing_result() {
            let config = SandboxConfig {
                test_command: Some(vec!["sleep".to_string(), "5".to_string()]),
                test_timeout_secs: 1,
                write_runner_config: false,
                ..SandboxConfig::default()
            };
            let executor = SandboxExecutor::new(registry(), config);
            let result = executor.run_tests(&FileSet::new(), &FileSet::new()).await.unwrap();
            assert!(!result.passed());
            assert!(result.timed_out());
            assert_eq!(result.diagnostics(), "timeout");
        }
    }
}
