//! Plugin Installation
//!
//! `install_from_source` is all-or-nothing: clone, validate, self-test, then
//! register. The clone lands in a staging directory private to the call and
//! is moved into place under the registry's writer lock, so a failing install
//! only ever removes what it created and the catalog and the store stay
//! exactly as they were.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use super::manifest::{find_manifest, load_manifest, validate_name};
use super::registry::{PluginRegistry, Tool};
use crate::config::SandboxConfig;
use crate::constants::plugins::{CLONE_TIMEOUT_SECS, STAGING_PREFIX};
use crate::sandbox::{CommandSpec, invoke_tool, run_command};
use crate::types::{FileSet, PluginManifest, Result, VerigenError};

impl PluginRegistry {
    /// Clone a plugin repository into the install directory and register it
    /// once its self-test passes
    #[instrument(skip(self))]
    pub async fn install_from_source(&self, source: &str) -> Result<PluginManifest> {
        let fail = |reason: String| VerigenError::install_failed(source, reason);

        let dir_name = repo_dir_name(source)
            .ok_or_else(|| fail("cannot derive a plugin directory from source".to_string()))?;
        let install_dir = self.plugins.install_dir.clone();
        let target = install_dir.join(&dir_name);
        // Early out only; the authoritative check happens under the lock
        if target.exists() {
            return Err(fail(format!("{} already exists", target.display())));
        }

        std::fs::create_dir_all(&install_dir).map_err(|e| fail(e.to_string()))?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&install_dir)
            .map_err(|e| fail(format!("cannot create staging directory: {}", e)))?;
        let checkout = staging.path().join(&dir_name);

        info!("Installing plugin from {} into {}", source, target.display());
        clone_repository(source, &install_dir, &checkout).await?;

        let _guard = self.writer.lock().await;
        if target.exists() {
            return Err(fail(format!("{} already exists", target.display())));
        }
        std::fs::rename(&checkout, &target)
            .map_err(|e| fail(format!("cannot move clone into {}: {}", target.display(), e)))?;

        // From here on the target directory belongs to this call
        self.install_locked(source, &target).await.map_err(|e| {
            remove_artifacts(&target);
            match e {
                VerigenError::PluginInstallFailed { .. } => e,
                other => fail(other.to_string()),
            }
        })
    }

    /// Validate, self-test and register a plugin already on disk. Nothing is
    /// registered unless every step succeeds.
    pub(super) async fn install_from_dir(&self, source: &str, dir: &Path) -> Result<PluginManifest> {
        // Held through the self-test so a concurrent install of the same name
        // cannot slip in between the check and the registration
        let _guard = self.writer.lock().await;
        self.install_locked(source, dir).await
    }

    /// Caller holds the writer lock
    async fn install_locked(&self, source: &str, dir: &Path) -> Result<PluginManifest> {
        let path = find_manifest(dir).ok_or_else(|| {
            VerigenError::plugin_validation(dir.display().to_string(), "no plugin manifest found")
        })?;
        let mut manifest = load_manifest(&path)?;

        if self.get(&manifest.name).is_some() {
            return Err(VerigenError::plugin_validation(
                &manifest.name,
                "a tool with this name is already registered",
            ));
        }

        self_test(&manifest, source, &self.sandbox).await?;

        manifest.verified = true;
        manifest.installed_at = Some(Utc::now());
        self.register_locked(manifest.clone())?;

        info!("Installed plugin {} v{}", manifest.name, manifest.version);
        Ok(manifest)
    }
}

async fn clone_repository(source: &str, cwd: &Path, target: &Path) -> Result<()> {
    let argv = vec![
        "git".to_string(),
        "clone".to_string(),
        "--depth".to_string(),
        "1".to_string(),
        source.to_string(),
        target.display().to_string(),
    ];
    let output = run_command(CommandSpec {
        tool: "git",
        argv: &argv,
        cwd,
        envs: vec![("GIT_TERMINAL_PROMPT", "0".to_string())],
        limit: Duration::from_secs(CLONE_TIMEOUT_SECS),
        max_output_bytes: 16 * 1024,
    })
    .await?;

    if !output.success {
        return Err(VerigenError::install_failed(
            source,
            format!("git clone failed: {}", output.failure_message()),
        ));
    }
    Ok(())
}

/// Run the tool once against a minimal sample of a kind it accepts
async fn self_test(manifest: &PluginManifest, source: &str, config: &SandboxConfig) -> Result<()> {
    let sample = self_test_sample(manifest);
    let tool = Tool::command(manifest.clone());
    invoke_tool(&tool, &sample, config)
        .await
        .map(|_| ())
        .map_err(|e| VerigenError::install_failed(source, format!("self-test of {} failed: {}", manifest.name, e)))
}

fn self_test_sample(manifest: &PluginManifest) -> FileSet {
    let accepts = |kind: &str| manifest.inputs.contains(kind);
    if accepts("typescript") {
        FileSet::single("test.ts", "const hello = 'world';")
    } else if accepts("javascript") {
        FileSet::single("test.js", "const hello = 'world';")
    } else if accepts("css") {
        FileSet::single("test.css", ".test { color: red; }")
    } else {
        FileSet::single("test.txt", "test content")
    }
}

/// Last path segment of a repository URL or path, minus `.git`
fn repo_dir_name(source: &str) -> Option<String> {
    let trimmed = source.trim().trim_end_matches('/');
    let last = trimmed.rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    validate_name(name).ok()?;
    Some(name.to_string())
}

fn remove_artifacts(target: &Path) {
    if target.exists()
        && let Err(e) = std::fs::remove_dir_all(target)
    {
        warn!("Failed to clean up {}: {}", target.display(), e);
    }
}
