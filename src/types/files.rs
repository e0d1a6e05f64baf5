//! File Sets
//!
//! A [`FileSet`] is the unit of work passed between pipeline stages: a mapping
//! of relative path to textual content. Stages never mutate a set in place;
//! [`FileSet::merge`] and [`FileSet::with_file`] produce new sets so earlier
//! snapshots stay available for diffing.

use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{Result, VerigenError};

/// Immutable path → content mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileSet {
    files: BTreeMap<String, String>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-file set
    pub fn single(path: impl Into<String>, content: impl Into<String>) -> Self {
        let mut files = BTreeMap::new();
        files.insert(path.into(), content.into());
        Self { files }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// New set with one path added or replaced
    pub fn with_file(&self, path: impl Into<String>, content: impl Into<String>) -> Self {
        let mut files = self.files.clone();
        files.insert(path.into(), content.into());
        Self { files }
    }

    /// Overlay `patch` on top of `self`. Only paths present in `patch` are
    /// replaced; everything else is carried over unchanged.
    pub fn merge(&self, patch: &FileSet) -> Self {
        let mut files = self.files.clone();
        for (path, content) in &patch.files {
            files.insert(path.clone(), content.clone());
        }
        Self { files }
    }

    /// Union of two disjoint-by-convention sets (sources + tests). Paths in
    /// `other` win on collision.
    pub fn union(&self, other: &FileSet) -> Self {
        self.merge(other)
    }

    /// Paths added, removed and modified going from `self` to `next`
    pub fn diff(&self, next: &FileSet) -> FileDiff {
        let mut diff = FileDiff::default();
        for (path, content) in &next.files {
            match self.files.get(path) {
                None => diff.added.push(path.clone()),
                Some(old) if old != content => diff.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in self.files.keys() {
            if !next.files.contains_key(path) {
                diff.removed.push(path.clone());
            }
        }
        diff
    }

    /// SHA-256 over the sorted `(path, content)` pairs, hex encoded
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, content) in &self.files {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(content.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Check every path is relative and stays inside its root
    pub fn validate_paths(&self) -> Result<()> {
        self.files.keys().try_for_each(|p| validate_relative_path(p))
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.files
    }
}

impl FromIterator<(String, String)> for FileSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, String>> for FileSet {
    fn from(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }
}

/// Result of [`FileSet::diff`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl FileDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// One-line summary, e.g. `+1 ~2 -0`
    pub fn summary(&self) -> String {
        format!(
            "+{} ~{} -{}",
            self.added.len(),
            self.modified.len(),
            self.removed.len()
        )
    }
}

/// Reject absolute paths, `..` traversal and empty names
pub fn validate_relative_path(path: &str) -> Result<()> {
    let invalid = |reason: &str| VerigenError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.trim().is_empty() {
        return Err(invalid("empty path"));
    }

    let p = Path::new(path);
    if p.is_absolute() || path.starts_with('/') || path.starts_with('\\') {
        return Err(invalid("absolute paths are not allowed"));
    }

    for component in p.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(invalid("parent traversal is not allowed")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("absolute paths are not allowed"));
            }
        }
    }

    Ok(())
}

/// Lowercase file extension of a path, if any
pub fn extension_of(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}
