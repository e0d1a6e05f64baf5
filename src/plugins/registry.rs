//! Plugin Registry
//!
//! Catalog of tools available to the sandbox. Built-in tools and installed
//! plugins share one ordered catalog; order is registration order and breaks
//! discovery ties.
//!
//! ## Locking
//!
//! - Lookups take a read lock on the catalog and never wait on storage.
//! - Mutations are serialized through one async writer lock, which is held
//!   across the storage write and the catalog update.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::manifest::{find_manifest, load_manifest};
use crate::config::{PluginsConfig, SandboxConfig};
use crate::constants::plugins::{LOW_COST_THRESHOLD_MS, score};
use crate::sandbox::BuiltinTool;
use crate::storage::SharedDatabase;
use crate::types::{PluginManifest, Result, ToolInfo, VerigenError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// In-memory transform shipped with the binary
    Builtin(BuiltinTool),
    /// Manifest command run in a workspace
    Command,
}

#[derive(Debug, Clone)]
pub struct Tool {
    pub manifest: PluginManifest,
    pub kind: ToolKind,
}

impl Tool {
    pub fn builtin(tool: BuiltinTool) -> Self {
        Self {
            manifest: tool.manifest(),
            kind: ToolKind::Builtin(tool),
        }
    }

    pub fn command(manifest: PluginManifest) -> Self {
        Self {
            manifest,
            kind: ToolKind::Command,
        }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.kind, ToolKind::Builtin(_))
    }
}

pub struct PluginRegistry {
    pub(super) plugins: PluginsConfig,
    pub(super) sandbox: SandboxConfig,
    db: Option<SharedDatabase>,
    catalog: RwLock<Vec<Tool>>,
    pub(super) writer: Mutex<()>,
}

impl PluginRegistry {
    /// Empty registry. Call [`load`](Self::load) to populate it.
    pub fn new(plugins: PluginsConfig, sandbox: SandboxConfig, db: Option<SharedDatabase>) -> Self {
        Self {
            plugins,
            sandbox,
            db,
            catalog: RwLock::new(Vec::new()),
            writer: Mutex::new(()),
        }
    }

    /// Built-ins, then stored plugins, then a directory scan
    pub async fn load(&self) -> Result<usize> {
        self.register_builtins();

        if let Some(db) = &self.db {
            let _guard = self.writer.lock().await;
            for manifest in db.load_plugins()? {
                if BuiltinTool::from_name(&manifest.name).is_some() {
                    continue;
                }
                self.upsert_entry(Tool::command(manifest));
            }
        }

        let scanned = self.scan().await?;
        let total = self.len();
        info!("Plugin catalog loaded: {} tools ({} from scan)", total, scanned);
        Ok(total)
    }

    /// Add the built-in tools ahead of anything else. Idempotent.
    pub fn register_builtins(&self) {
        for builtin in BuiltinTool::ALL {
            if self.get(builtin.name()).is_none() {
                self.upsert_entry(Tool::builtin(builtin));
            }
        }
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Upsert every valid manifest found one level below the configured
    /// plugin directories. Invalid manifests are logged and skipped.
    pub async fn scan(&self) -> Result<usize> {
        let mut registered = 0;

        for dir in &self.plugins.directories {
            let mut plugin_dirs: Vec<PathBuf> = match std::fs::read_dir(dir) {
                Ok(entries) => entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect(),
                Err(e) => {
                    debug!("Skipping plugin directory {}: {}", dir.display(), e);
                    continue;
                }
            };
            plugin_dirs.sort();

            for plugin_dir in plugin_dirs {
                let Some(path) = find_manifest(&plugin_dir) else {
                    continue;
                };
                match self.register(&path).await {
                    Ok(_) => registered += 1,
                    Err(e) => warn!("Skipping plugin at {}: {}", path.display(), e),
                }
            }
        }

        Ok(registered)
    }

    /// Validate a manifest file and upsert it into the catalog
    pub async fn register(&self, manifest_path: &Path) -> Result<PluginManifest> {
        let mut manifest = load_manifest(manifest_path)?;

        // Re-registration keeps state the file does not carry
        if let Some(existing) = self.get(&manifest.name) {
            manifest.verified = existing.manifest.verified && existing.manifest.version == manifest.version;
            manifest.enabled = existing.manifest.enabled;
            manifest.installed_at = existing.manifest.installed_at;
        }

        self.register_manifest(manifest.clone()).await?;
        Ok(manifest)
    }

    /// Upsert a manifest by name and persist it
    pub async fn register_manifest(&self, manifest: PluginManifest) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.register_locked(manifest)
    }

    /// Caller holds the writer lock
    pub(super) fn register_locked(&self, manifest: PluginManifest) -> Result<()> {
        if BuiltinTool::from_name(&manifest.name).is_some() {
            return Err(VerigenError::plugin_validation(
                &manifest.name,
                "name is reserved by a built-in tool",
            ));
        }

        if let Some(db) = &self.db {
            db.upsert_plugin(&manifest)?;
        }
        debug!("Registered plugin {} v{}", manifest.name, manifest.version);
        self.upsert_entry(Tool::command(manifest));
        Ok(())
    }

    /// Caller holds the writer lock. Returns the removed entry.
    pub(super) fn unregister_locked(&self, name: &str) -> Result<Option<Tool>> {
        if let Some(db) = &self.db {
            db.delete_plugin(name)?;
        }
        let mut catalog = self.catalog.write().unwrap_or_else(|p| p.into_inner());
        let removed = catalog
            .iter()
            .position(|t| t.name() == name)
            .map(|i| catalog.remove(i));
        Ok(removed)
    }

    /// Replace in place to keep catalog order, else append
    fn upsert_entry(&self, tool: Tool) {
        let mut catalog = self.catalog.write().unwrap_or_else(|p| p.into_inner());
        match catalog.iter_mut().find(|t| t.name() == tool.name()) {
            Some(slot) => *slot = tool,
            None => catalog.push(tool),
        }
    }

    // =========================================================================
    // Management
    // =========================================================================

    /// Remove an installed plugin. Artifacts under the install directory are
    /// deleted as well; built-in tools cannot be removed.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.writer.lock().await;

        let tool = self
            .get(name)
            .ok_or_else(|| VerigenError::PluginNotFound(name.to_string()))?;
        if tool.is_builtin() {
            return Err(VerigenError::plugin_validation(name, "built-in tools cannot be removed"));
        }

        self.unregister_locked(name)?;

        if let Some(dir) = &tool.manifest.directory
            && dir.starts_with(&self.plugins.install_dir)
            && dir.exists()
        {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                warn!("Failed to remove plugin directory {}: {}", dir.display(), e);
            }
        }

        info!("Removed plugin {}", name);
        Ok(())
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        let _guard = self.writer.lock().await;

        let mut tool = self
            .get(name)
            .ok_or_else(|| VerigenError::PluginNotFound(name.to_string()))?;
        tool.manifest.enabled = enabled;

        // Built-ins are recreated on every load, so only plugins persist
        if !tool.is_builtin()
            && let Some(db) = &self.db
        {
            db.upsert_plugin(&tool.manifest)?;
        }
        self.upsert_entry(tool);
        Ok(())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn get(&self, name: &str) -> Option<Tool> {
        self.catalog
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|t| t.name() == name)
            .cloned()
    }

    pub fn catalog(&self) -> Vec<ToolInfo> {
        self.catalog
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|t| t.manifest.catalog_entry())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.catalog.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best enabled tool for a goal over the given input kinds, or `None`
    /// when nothing scores above zero. Ties go to the earlier entry.
    pub fn find_tool(&self, goal: &str, input_kinds: &BTreeSet<String>) -> Option<ToolInfo> {
        let words: Vec<String> = goal
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();

        let catalog = self.catalog.read().unwrap_or_else(|p| p.into_inner());
        let mut best: Option<(&Tool, u32)> = None;

        for tool in catalog.iter().filter(|t| t.manifest.enabled) {
            let s = score_tool(&tool.manifest, &words, input_kinds);
            if s > best.map_or(0, |(_, b)| b) {
                best = Some((tool, s));
            }
        }

        best.map(|(tool, s)| {
            debug!("find_tool '{}' -> {} (score {})", goal, tool.name(), s);
            tool.manifest.catalog_entry()
        })
    }
}

fn score_tool(manifest: &PluginManifest, goal_words: &[String], input_kinds: &BTreeSet<String>) -> u32 {
    let mut s = 0;
    if manifest.accepts_any(input_kinds.iter().map(String::as_str)) {
        s += score::INPUT_MATCH;
    }
    let description = manifest.description.to_lowercase();
    if goal_words.iter().any(|w| description.contains(w.as_str())) {
        s += score::KEYWORD_MATCH;
    }
    if manifest.estimated_cost_ms < LOW_COST_THRESHOLD_MS {
        s += score::LOW_COST;
    }
    s
}
