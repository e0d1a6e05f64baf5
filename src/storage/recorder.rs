//! Run Recorder
//!
//! Persistence contract used by the pipeline and the sandbox. The pipeline
//! calls [`RunRecorder::record_stage`] after every transition and before the
//! next stage begins, and [`RunRecorder::record_observation`] once at Report.
//!
//! [`Database`] implements the recorder; read-side queries (`load_run`,
//! `list_runs`, ...) live here too so the run store stays in one place.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use super::database::Database;
use crate::types::{
    FileDiff, Observation, PluginExecution, Result, ResultExt, Run, Stage, VerigenError,
};

#[async_trait]
pub trait RunRecorder: Send + Sync {
    /// Persist the current state of a run (upsert)
    async fn record_stage(&self, run: &Run) -> Result<()>;

    /// Persist the final measurement of a completed run
    async fn record_observation(&self, observation: &Observation) -> Result<()>;

    async fn record_plugin_execution(&self, execution: &PluginExecution) -> Result<()>;
}

pub type SharedRecorder = Arc<dyn RunRecorder>;

/// Row of `runs list`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub project_ref: Option<String>,
    pub prompt: String,
    pub stage: Stage,
    pub success: bool,
    pub repair_attempts: u32,
    pub error_message: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// One persisted stage transition
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub repair_attempts: u32,
    pub recorded_at: String,
}

#[async_trait]
impl RunRecorder for Database {
    async fn record_stage(&self, run: &Run) -> Result<()> {
        self.save_run(run)
    }

    async fn record_observation(&self, observation: &Observation) -> Result<()> {
        self.save_observation(observation)
    }

    async fn record_plugin_execution(&self, execution: &PluginExecution) -> Result<()> {
        self.save_plugin_execution(execution)
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| VerigenError::Storage(format!("Invalid timestamp '{}': {}", s, e)))
}

impl Database {
    // =========================================================================
    // Runs
    // =========================================================================

    /// Upsert the run row and append a stage history entry
    pub fn save_run(&self, run: &Run) -> Result<()> {
        let snapshot = serde_json::to_string(run)?;
        let now = Utc::now().to_rfc3339();
        let stage = run.stage.as_str();

        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .with_context("Failed to start transaction")?;

        tx.execute(
            "INSERT INTO runs (id, project_ref, prompt, stage, success, repair_attempts,
                max_repair_attempts, skip_tests, error_message, snapshot, created_at, updated_at,
                completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                stage = excluded.stage,
                success = excluded.success,
                repair_attempts = excluded.repair_attempts,
                error_message = excluded.error_message,
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at",
            params![
                run.id,
                run.project_ref,
                run.prompt,
                stage,
                run.success,
                run.repair_attempts,
                run.max_repair_attempts,
                run.skip_tests,
                run.error_message,
                snapshot,
                run.created_at.to_rfc3339(),
                now,
                run.completed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .with_context_fn(|| format!("Failed to store run {}", run.id))?;

        tx.execute(
            "INSERT INTO run_stages (run_id, stage, repair_attempts, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![run.id, stage, run.repair_attempts, now],
        )
        .with_context("Failed to store stage history")?;

        tx.commit().with_context("Failed to commit run")?;

        tracing::debug!("Recorded run {} at stage {}", run.id, stage);
        Ok(())
    }

    pub fn load_run(&self, id: &str) -> Result<Option<Run>> {
        let snapshot: Option<String> = self
            .conn()?
            .query_row(
                "SELECT snapshot FROM runs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .with_context("Failed to load run")?;

        snapshot
            .map(|s| serde_json::from_str(&s).map_err(VerigenError::from))
            .transpose()
    }

    /// Most recent runs first, optionally scoped to a project
    pub fn list_runs(&self, project_ref: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, project_ref, prompt, stage, success, repair_attempts, error_message,
                        created_at, completed_at
                 FROM runs
                 WHERE ?1 IS NULL OR project_ref = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )
            .with_context("Failed to prepare run query")?;

        let rows = stmt
            .query_map(params![project_ref, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })
            .with_context("Failed to query runs")?;

        let mut summaries = Vec::new();
        for row in rows {
            let (id, project_ref, prompt, stage, success, repair_attempts, error_message, created_at, completed_at) =
                row.with_context("Failed to read run row")?;
            let stage = Stage::parse(&stage)
                .ok_or_else(|| VerigenError::Storage(format!("Unknown stage '{}' for run {}", stage, id)))?;
            summaries.push(RunSummary {
                id,
                project_ref,
                prompt,
                stage,
                success,
                repair_attempts,
                error_message,
                created_at,
                completed_at,
            });
        }
        Ok(summaries)
    }

    /// Stage transitions of a run in recording order
    pub fn stage_history(&self, run_id: &str) -> Result<Vec<StageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT stage, repair_attempts, recorded_at FROM run_stages
                 WHERE run_id = ?1 ORDER BY id",
            )
            .with_context("Failed to prepare stage query")?;

        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .with_context("Failed to query stage history")?;

        let mut history = Vec::new();
        for row in rows {
            let (stage, repair_attempts, recorded_at) = row.with_context("Failed to read stage row")?;
            if let Some(stage) = Stage::parse(&stage) {
                history.push(StageRecord {
                    stage,
                    repair_attempts,
                    recorded_at,
                });
            }
        }
        Ok(history)
    }

    // =========================================================================
    // Observations
    // =========================================================================

    pub fn save_observation(&self, observation: &Observation) -> Result<()> {
        let diff_json = serde_json::to_string(&observation.diff)?;

        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO observations (run_id, project_ref, prompt_fingerprint,
                    prompt_text, files_digest, diff_json, passed_count, failed_count, latency_ms,
                    model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    observation.run_id,
                    observation.project_ref,
                    observation.prompt_fingerprint,
                    observation.prompt_text,
                    observation.files_digest,
                    diff_json,
                    observation.passed_count,
                    observation.failed_count,
                    observation.latency_ms as i64,
                    observation.model,
                    observation.created_at.to_rfc3339(),
                ],
            )
            .with_context("Failed to store observation")?;

        self.conn()?
            .execute(
                "UPDATE runs SET model = ?1 WHERE id = ?2",
                params![observation.model, observation.run_id],
            )
            .with_context("Failed to store run model")?;

        Ok(())
    }

    pub fn load_observation(&self, run_id: &str) -> Result<Option<Observation>> {
        let row = self
            .conn()?
            .query_row(
                "SELECT run_id, project_ref, prompt_fingerprint, prompt_text, files_digest,
                        diff_json, passed_count, failed_count, latency_ms, model, created_at
                 FROM observations WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, u32>(6)?,
                        row.get::<_, u32>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, String>(10)?,
                    ))
                },
            )
            .optional()
            .with_context("Failed to load observation")?;

        let Some((
            run_id,
            project_ref,
            prompt_fingerprint,
            prompt_text,
            files_digest,
            diff_json,
            passed_count,
            failed_count,
            latency_ms,
            model,
            created_at,
        )) = row
        else {
            return Ok(None);
        };

        let diff: FileDiff = serde_json::from_str(&diff_json)?;
        Ok(Some(Observation {
            run_id,
            project_ref,
            prompt_fingerprint,
            prompt_text,
            files_digest,
            diff,
            passed_count,
            failed_count,
            latency_ms: latency_ms.max(0) as u64,
            model,
            created_at: parse_time(&created_at)?,
        }))
    }

    // =========================================================================
    // Plugin Executions
    // =========================================================================

    pub fn save_plugin_execution(&self, execution: &PluginExecution) -> Result<()> {
        let inputs = serde_json::to_string(&execution.input_files)?;
        let outputs = serde_json::to_string(&execution.output_files)?;

        self.conn()?
            .execute(
                "INSERT INTO plugin_executions (id, plugin_name, started_at, completed_at,
                    duration_ms, input_files, output_files, success, error_message, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    execution.id,
                    execution.plugin_name,
                    execution.started_at.to_rfc3339(),
                    execution.completed_at.to_rfc3339(),
                    execution.duration_ms as i64,
                    inputs,
                    outputs,
                    execution.success,
                    execution.error_message,
                    execution.checksum,
                ],
            )
            .with_context("Failed to store plugin execution")?;
        Ok(())
    }

    /// Most recent executions of a plugin first
    pub fn list_plugin_executions(&self, plugin_name: &str, limit: usize) -> Result<Vec<PluginExecution>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, plugin_name, started_at, completed_at, duration_ms, input_files,
                        output_files, success, error_message, checksum
                 FROM plugin_executions WHERE plugin_name = ?1
                 ORDER BY started_at DESC LIMIT ?2",
            )
            .with_context("Failed to prepare execution query")?;

        let rows = stmt
            .query_map(params![plugin_name, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, bool>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })
            .with_context("Failed to query plugin executions")?;

        let mut executions = Vec::new();
        for row in rows {
            let (id, plugin_name, started_at, completed_at, duration_ms, inputs, outputs, success, error_message, checksum) =
                row.with_context("Failed to read execution row")?;
            executions.push(PluginExecution {
                id,
                plugin_name,
                started_at: parse_time(&started_at)?,
                completed_at: parse_time(&completed_at)?,
                duration_ms: duration_ms.max(0) as u64,
                input_files: serde_json::from_str(&inputs)?,
                output_files: serde_json::from_str(&outputs)?,
                success,
                error_message,
                checksum,
            });
        }
        Ok(executions)
    }
}
