//! Disposable Workspaces
//!
//! Every sandbox call gets its own temporary directory. The directory is
//! removed when the [`Workspace`] is dropped, which covers success, error,
//! timeout and cancellation (a cancelled future drops its workspace).

use std::path::{Component, Path};

use ignore::WalkBuilder;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::constants::sandbox::{MAX_FILE_BYTES, SKIPPED_DIRS, WORKSPACE_PREFIX};
use crate::types::{FileSet, Result};

pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir()?;
        debug!("Created workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file set into the workspace. All paths are validated before
    /// anything is written.
    pub fn materialize(&self, files: &FileSet) -> Result<()> {
        files.validate_paths()?;
        for (path, content) in files.iter() {
            self.write_unchecked(path, content)?;
        }
        Ok(())
    }

    pub fn write_file(&self, path: &str, content: &str) -> Result<()> {
        crate::types::validate_relative_path(path)?;
        self.write_unchecked(path, content)
    }

    pub fn read_file(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(self.path().join(path)).ok()
    }

    fn write_unchecked(&self, path: &str, content: &str) -> Result<()> {
        let target = self.path().join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, content)?;
        Ok(())
    }

    /// Read every regular UTF-8 file back as a file set. Symlinks are not
    /// followed; dependency and VCS directories are skipped.
    pub fn collect(&self) -> Result<FileSet> {
        let root = self.path();
        let walker = WalkBuilder::new(root)
            .hidden(false)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false)
            .follow_links(false)
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_none_or(|name| !SKIPPED_DIRS.contains(&name))
            })
            .build();

        let mut files = Vec::new();
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();
            let Some(relative) = relative_key(root, path) else {
                continue;
            };

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > MAX_FILE_BYTES {
                warn!("Skipping large workspace file {} ({} bytes)", relative, size);
                continue;
            }

            match std::fs::read_to_string(path) {
                Ok(content) => files.push((relative, content)),
                Err(e) => debug!("Skipping unreadable workspace file {}: {}", relative, e),
            }
        }

        Ok(files.into_iter().collect())
    }
}

/// Forward-slash path of `path` relative to `root`
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    (!parts.is_empty()).then(|| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VerigenError;

    #[test]
    fn test_materialize_and_collect() {
        let ws = Workspace::create().unwrap();
        let files: FileSet = [
            ("src/a.ts".to_string(), "a".to_string()),
            ("package.json".to_string(), "{}".to_string()),
        ]
        .into_iter()
        .collect();
        ws.materialize(&files).unwrap();
        assert_eq!(ws.collect().unwrap(), files);
    }

    #[test]
    fn test_rejects_traversal_before_writing() {
        let ws = Workspace::create().unwrap();
        let files: FileSet = [
            ("a.ts".to_string(), "a".to_string()),
            ("../escape.ts".to_string(), "x".to_string()),
        ]
        .into_iter()
        .collect();
        let err = ws.materialize(&files).unwrap_err();
        assert!(matches!(err, VerigenError::InvalidPath { .. }));
        assert!(ws.collect().unwrap().is_empty());
    }

    #[test]
    fn test_skips_dependency_dirs() {
        let ws = Workspace::create().unwrap();
        ws.write_file("node_modules/x/index.js", "x").unwrap();
        ws.write_file("src/index.js", "y").unwrap();
        let collected = ws.collect().unwrap();
        assert_eq!(collected.len(), 1);
        assert!(collected.contains("src/index.js"));
    }

    #[test]
    fn test_dropped_workspace_is_removed() {
        let ws = Workspace::create().unwrap();
        let path = ws.path().to_path_buf();
        ws.write_file("a.txt", "a").unwrap();
        drop(ws);
        assert!(!path.exists());
    }
}
