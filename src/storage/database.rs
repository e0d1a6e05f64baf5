//! Database Layer with Connection Pooling and Safe Transactions
//!
//! SQLite storage for runs, observations, the plugin catalog and plugin
//! execution records:
//! - Connection pooling via r2d2 for concurrent runs
//! - Panic-safe transactions with automatic rollback
//! - Version-tracked migrations
//! - WAL mode so readers (`runs list`) never block a recording pipeline

use std::path::Path;
use std::sync::Arc;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};

use crate::types::{PluginManifest, Result, ResultExt, VerigenError};

/// Shared database handle for async contexts.
pub type SharedDatabase = Arc<Database>;

const SCHEMA: &str = include_str!("schema.sql");

/// Current schema version for migration tracking
const SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    description: &'static str,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 2,
    description: "Add runs.model column",
    up: "ALTER TABLE runs ADD COLUMN model TEXT",
}];

/// Connection pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool
    pub max_size: u32,
    /// Minimum idle connections to keep ready
    pub min_idle: u32,
    /// Timeout for acquiring a connection (seconds)
    pub connection_timeout_secs: u64,
}

impl PoolConfig {
    const MIN_POOL_SIZE: u32 = 2;
    const MAX_POOL_SIZE: u32 = 16;

    /// One connection per core, clamped
    pub fn auto() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|p| p.get() as u32)
            .unwrap_or(4);
        let max_size = cores.clamp(Self::MIN_POOL_SIZE, Self::MAX_POOL_SIZE);
        Self {
            max_size,
            min_idle: 1,
            connection_timeout_secs: 30,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

/// Thread-safe database with connection pooling.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open database with connection pooling at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, PoolConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: PoolConfig) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let manager =
            SqliteConnectionManager::file(path.as_ref()).with_init(Self::configure_connection);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(std::time::Duration::from_secs(
                config.connection_timeout_secs,
            ))
            .build(manager)
            .map_err(|e| VerigenError::Storage(format!("Failed to create connection pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Open an in-memory database for testing or temporary use.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| VerigenError::Storage(format!("Failed to create in-memory pool: {}", e)))?;

        Ok(Self { pool })
    }

    fn configure_connection(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            PRAGMA wal_autocheckpoint = 1000;
            "#,
        )?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            VerigenError::Storage(format!("Failed to acquire database connection: {}", e))
        })
    }

    /// Initialize database schema.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn()?;

        let existing: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'runs')",
                [],
                |row| row.get(0),
            )
            .with_context("Failed to inspect schema")?;

        conn.execute_batch(SCHEMA)
            .with_context("Failed to initialize database schema")?;

        // Fresh databases get every column from schema.sql
        if !existing {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to set schema version")?;
        }

        drop(conn);
        self.migrate()
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;

        let current_version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        for migration in MIGRATIONS {
            if migration.version > current_version {
                conn.execute_batch(migration.up).with_context_fn(|| {
                    format!(
                        "Failed to apply migration {}: {}",
                        migration.version, migration.description
                    )
                })?;

                tracing::info!(
                    "Applied migration {}: {}",
                    migration.version,
                    migration.description
                );
            }
        }

        if current_version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                .with_context("Failed to update schema version")?;
        }

        Ok(())
    }

    /// Get a raw connection for advanced operations.
    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.conn()
    }

    /// Execute a function within a panic-safe database transaction.
    ///
    /// If the closure panics the transaction is rolled back and an error is
    /// returned instead of poisoning the connection pool.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + std::panic::UnwindSafe,
    {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .with_context("Failed to start transaction")?;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&tx)));

        match result {
            Ok(Ok(value)) => {
                tx.commit().with_context("Failed to commit transaction")?;
                Ok(value)
            }
            // Rolled back on drop
            Ok(Err(e)) => Err(e),
            Err(panic_payload) => {
                let panic_msg = panic_payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic_payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "Unknown panic".to_string());

                tracing::error!("Transaction panicked: {}", panic_msg);
                Err(VerigenError::Storage(format!(
                    "Transaction panicked: {}",
                    panic_msg
                )))
            }
        }
    }

    // =========================================================================
    // Plugin Catalog
    // =========================================================================

    /// Insert or replace a manifest by name
    pub fn upsert_plugin(&self, manifest: &PluginManifest) -> Result<()> {
        let json = serde_json::to_string(manifest)?;
        let now = chrono::Utc::now().to_rfc3339();

        self.conn()?
            .execute(
                "INSERT INTO plugins (name, manifest, enabled, verified, installed_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(name) DO UPDATE SET
                    manifest = excluded.manifest,
                    enabled = excluded.enabled,
                    verified = excluded.verified,
                    installed_at = COALESCE(excluded.installed_at, plugins.installed_at),
                    updated_at = excluded.updated_at",
                params![
                    manifest.name,
                    json,
                    manifest.enabled,
                    manifest.verified,
                    manifest.installed_at.map(|t| t.to_rfc3339()),
                    now,
                ],
            )
            .with_context_fn(|| format!("Failed to store plugin {}", manifest.name))?;

        tracing::debug!("Stored plugin manifest: {}", manifest.name);
        Ok(())
    }

    /// Returns whether a row was removed
    pub fn delete_plugin(&self, name: &str) -> Result<bool> {
        let affected = self
            .conn()?
            .execute("DELETE FROM plugins WHERE name = ?1", params![name])
            .with_context("Failed to delete plugin")?;
        Ok(affected > 0)
    }

    pub fn load_plugin(&self, name: &str) -> Result<Option<PluginManifest>> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT manifest FROM plugins WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .with_context("Failed to load plugin")?;

        json.map(|j| serde_json::from_str(&j).map_err(VerigenError::from))
            .transpose()
    }

    /// All stored manifests in insertion order. Rows that no longer
    /// deserialize are skipped with a warning.
    pub fn load_plugins(&self) -> Result<Vec<PluginManifest>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name, manifest FROM plugins ORDER BY rowid")
            .with_context("Failed to prepare plugin query")?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .with_context("Failed to query plugins")?;

        let mut manifests = Vec::new();
        for row in rows {
            let (name, json) = row.with_context("Failed to read plugin row")?;
            match serde_json::from_str::<PluginManifest>(&json) {
                Ok(m) => manifests.push(m),
                Err(e) => tracing::warn!("Skipping stored plugin {}: {}", name, e),
            }
        }
        Ok(manifests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn manifest(name: &str) -> PluginManifest {
        PluginManifest {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: "Uppercases text".to_string(),
            inputs: BTreeSet::from(["txt".to_string()]),
            outputs: BTreeSet::from(["txt".to_string()]),
            command: vec!["sh".to_string(), "run.sh".to_string()],
            estimated_cost_ms: 100,
            estimated_tokens: 0,
            timeout_ms: None,
            enabled: true,
            verified: false,
            directory: None,
            installed_at: None,
        }
    }

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().expect("Failed to open in-memory database");
        db.initialize().expect("Failed to initialize schema");

        let conn = db.connection().expect("Failed to get connection");
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in ["runs", "run_stages", "observations", "plugins", "plugin_executions"] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }

        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        db.initialize().unwrap();
    }

    #[test]
    fn test_migrates_version_one_database() {
        let db = Database::open_in_memory().unwrap();
        {
            let conn = db.connection().unwrap();
            conn.execute_batch(
                "CREATE TABLE runs (id TEXT PRIMARY KEY, project_ref TEXT, prompt TEXT NOT NULL,
                    stage TEXT NOT NULL, success INTEGER NOT NULL DEFAULT 0,
                    repair_attempts INTEGER NOT NULL DEFAULT 0, max_repair_attempts INTEGER NOT NULL,
                    skip_tests INTEGER NOT NULL DEFAULT 0, error_message TEXT, snapshot TEXT NOT NULL,
                    created_at TEXT NOT NULL, updated_at TEXT NOT NULL, completed_at TEXT);
                 PRAGMA user_version = 1;",
            )
            .unwrap();
        }
        db.initialize().unwrap();

        let conn = db.connection().unwrap();
        let has_model: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM pragma_table_info('runs') WHERE name = 'model')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(has_model);
    }

    #[test]
    fn test_transaction_panic_safety() {
        let db = Database::open_in_memory().expect("Failed to open database");
        db.initialize().expect("Failed to initialize");

        let result = db.transaction(|_conn| {
            panic!("Intentional panic for testing");
            #[allow(unreachable_code)]
            Ok(())
        });

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("panicked"));
        assert!(db.connection().is_ok());
    }

    #[test]
    fn test_plugin_catalog_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        db.upsert_plugin(&manifest("upper")).unwrap();
        db.upsert_plugin(&manifest("lower")).unwrap();

        let mut updated = manifest("upper");
        updated.verified = true;
        db.upsert_plugin(&updated).unwrap();

        let all = db.load_plugins().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "upper");
        assert!(all[0].verified);

        assert!(db.delete_plugin("upper").unwrap());
        assert!(!db.delete_plugin("upper").unwrap());
        assert!(db.load_plugin("upper").unwrap().is_none());
        assert!(db.load_plugin("lower").unwrap().is_some());
    }
}
