//! Persistence
//!
//! SQLite-backed run store, plugin catalog and execution log.

pub mod database;
pub mod recorder;

pub use database::{Database, PoolConfig, SharedDatabase};
pub use recorder::{RunRecorder, RunSummary, SharedRecorder, StageRecord};
