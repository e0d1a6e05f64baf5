//! Plugin Registry
//!
//! Manifest-driven catalog of tools for the sandbox:
//!
//! - `manifest`: loading and validating `plugin.json` / `plugin.yaml`
//! - `registry`: the shared catalog, discovery scoring, enable/remove
//! - `install`: clone, self-test and register from a git source

mod install;
pub mod manifest;
mod registry;

pub use manifest::{REQUIRED_FIELDS, find_manifest, load_manifest, parse_manifest};
pub use registry::{PluginRegistry, Tool, ToolKind};

use std::sync::Arc;

pub type SharedRegistry = Arc<PluginRegistry>;
