//! verigen - Test-Driven Code Generation Orchestrator
//!
//! Turns a natural-language prompt into source files and proves them against
//! generated unit tests, repairing failures within a bounded budget.
//!
//! ## Core Features
//!
//! - **Staged Pipeline**: Interpret → Scaffold → UnitTest → Execute ⇄ Repair → Report
//! - **Deterministic Fallbacks**: every engine failure degrades to a known-good artifact
//! - **Sandboxed Verification**: isolated workspaces with timeouts for tests and tools
//! - **Plugin Tools**: manifest-described commands, self-tested before registration
//! - **Run History**: SQLite persistence of stage transitions and observations
//!
//! ## Quick Start
//!
//! ```ignore
//! use verigen::{Config, RunRequest, Studio};
//!
//! let studio = Studio::open(&Config::default()).await?;
//! let mut handle = studio.start_run(RunRequest::new("A todo list"));
//! while let Some(event) = handle.events.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! let run = handle.wait().await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: completion engines, prompts, reply extraction
//! - [`pipeline`]: the run state machine and its event sink
//! - [`sandbox`]: isolated tool and test execution
//! - [`plugins`]: manifest loading, registry, install
//! - [`storage`]: SQLite persistence with connection pooling
//! - [`config`]: layered configuration

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod pipeline;
pub mod plugins;
pub mod sandbox;
pub mod storage;
pub mod studio;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader};

// Error Types
pub use types::error::{ErrorCategory, Result, ResultExt, VerigenError};

// Domain Types
pub use types::{
    Contract, FileSet, PluginManifest, Run, RunRequest, Stage, StreamEvent, ToolInfo,
    VerificationResult,
};

// Storage
pub use storage::database::PoolConfig;
pub use storage::{Database, SharedDatabase};

// =============================================================================
// Orchestration Re-exports
// =============================================================================

pub use pipeline::{EventSink, GenerationPipeline, RunHandle};
pub use plugins::{PluginRegistry, SharedRegistry};
pub use sandbox::{SandboxExecutor, TestRunner, ToolOutput};
pub use studio::Studio;

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{CompletionEngine, OfflineEngine, SharedEngine, create_engine, with_timeout};
