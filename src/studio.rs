//! Studio Facade
//!
//! Caller-facing entry point wiring the pipeline, sandbox, plugin registry
//! and run store together. Transports (the CLI, or a server) talk only to
//! [`Studio`].

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ai::{SharedEngine, create_engine};
use crate::config::Config;
use crate::pipeline::{EventSink, GenerationPipeline, RunHandle};
use crate::plugins::{PluginRegistry, SharedRegistry};
use crate::sandbox::{SandboxExecutor, ToolOutput};
use crate::storage::{Database, RunSummary, SharedDatabase, SharedRecorder};
use crate::types::{FileSet, PluginManifest, Result, Run, RunRequest, ToolInfo, VerigenError};

pub struct Studio {
    pipeline: Arc<GenerationPipeline>,
    executor: Arc<SandboxExecutor>,
    registry: SharedRegistry,
    db: SharedDatabase,
    active: Arc<DashMap<String, CancellationToken>>,
}

impl Studio {
    /// Open storage, load the plugin catalog and build the engine from
    /// configuration
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let db = Database::open(&config.storage.database)?;
        db.initialize()?;
        let db: SharedDatabase = Arc::new(db);
        let engine = create_engine(&config.llm)?;
        Self::with_engine(config, engine, db).await
    }

    /// Build around an existing engine and database
    pub async fn with_engine(config: &Config, engine: SharedEngine, db: SharedDatabase) -> Result<Self> {
        let registry = Arc::new(PluginRegistry::new(
            config.plugins.clone(),
            config.sandbox.clone(),
            Some(db.clone()),
        ));
        registry.load().await?;

        let recorder: SharedRecorder = db.clone();
        let executor = Arc::new(
            SandboxExecutor::new(registry.clone(), config.sandbox.clone()).with_recorder(recorder.clone()),
        );
        let pipeline = Arc::new(
            GenerationPipeline::new(engine, executor.clone(), config.pipeline.clone()).with_recorder(recorder),
        );

        info!("Studio ready: {} tools in catalog", registry.len());
        Ok(Self {
            pipeline,
            executor,
            registry,
            db,
            active: Arc::new(DashMap::new()),
        })
    }

    // =========================================================================
    // Runs
    // =========================================================================

    /// Start a run in the background
    pub fn start_run(&self, request: RunRequest) -> RunHandle {
        let (sink, events) = EventSink::channel();
        let cancel = CancellationToken::new();
        let run = self.pipeline.new_run(&request);
        let run_id = run.id.clone();
        self.active.insert(run_id.clone(), cancel.clone());

        let pipeline = self.pipeline.clone();
        let active = self.active.clone();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let run = pipeline.execute_run(run, sink, token).await;
            active.remove(&run.id);
            run
        });

        RunHandle {
            run_id,
            events,
            cancel,
            join,
        }
    }

    /// Cancel an in-flight run. Returns false when the run is not active.
    pub fn cancel_run(&self, run_id: &str) -> bool {
        match self.active.get(run_id) {
            Some(token) => {
                debug!("Cancelling run {}", run_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_runs(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        self.db
            .load_run(run_id)?
            .ok_or_else(|| VerigenError::RunNotFound(run_id.to_string()))
    }

    pub fn list_runs(&self, project_ref: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        self.db.list_runs(project_ref, limit)
    }

    // =========================================================================
    // Tools
    // =========================================================================

    pub fn tool_catalog(&self) -> Vec<ToolInfo> {
        self.registry.catalog()
    }

    pub async fn execute_tool(&self, name: &str, files: &FileSet) -> Result<ToolOutput> {
        self.executor.execute(name, files).await
    }

    pub fn find_tool(&self, goal: &str, input_kinds: &BTreeSet<String>) -> Option<ToolInfo> {
        self.registry.find_tool(goal, input_kinds)
    }

    pub async fn install_plugin(&self, source: &str) -> Result<PluginManifest> {
        self.registry.install_from_source(source).await
    }

    pub async fn remove_plugin(&self, name: &str) -> Result<()> {
        self.registry.remove(name).await
    }

    pub async fn set_plugin_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.registry.set_enabled(name, enabled).await
    }

    /// Rescan plugin directories; returns the number of manifests registered
    pub async fn scan_plugins(&self) -> Result<usize> {
        self.registry.scan().await
    }

    pub fn database(&self) -> &SharedDatabase {
        &self.db
    }
}
