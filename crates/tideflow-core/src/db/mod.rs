//! SQLite database layer for the tideflow engine.
//!
//! Uses rusqlite with WAL mode. All database operations are executed via
//! `tokio::task::spawn_blocking` to avoid blocking the async runtime.
//!
//! The busy timeout is zero: a writer that finds the database locked by
//! another engine instance fails immediately with `LockUnavailable` instead
//! of queueing. Together with the compare-and-swap on `processes.version`
//! this gives the step loop its non-blocking exclusive lock.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::EngineError;

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &str) -> Result<Self, EngineError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)
            .map_err(|e| EngineError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| EngineError::Database(format!("Failed to set pragmas: {}", e)))?;
        conn.busy_timeout(Duration::ZERO)
            .map_err(|e| EngineError::Database(format!("Failed to set busy timeout: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;

        tracing::info!("SQLite database opened at: {}", db_path);
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, EngineError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Database(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| EngineError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::Database(format!("Lock poisoned: {}", e)))?;
        f(&conn).map_err(EngineError::from)
    }

    /// Execute a closure with access to the database connection (async-friendly).
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| EngineError::Database(format!("Task join error: {}", e)))?
    }

    /// Run a closure inside an IMMEDIATE transaction.
    ///
    /// The write lock is taken up front, so a concurrent writer makes this
    /// fail with `LockUnavailable` before any work is done. `Ok` commits,
    /// `Err` rolls back.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, EngineError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| EngineError::Database(format!("Lock poisoned: {}", e)))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    /// Async-friendly variant of [`Database::with_tx`].
    pub async fn with_tx_async<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_tx(f))
            .await
            .map_err(|e| EngineError::Database(format!("Task join error: {}", e)))?
    }

    /// Create all tables if they don't exist.
    fn initialize_tables(&self) -> Result<(), EngineError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS workflows (
                    id              TEXT PRIMARY KEY,
                    name            TEXT NOT NULL,
                    version         INTEGER NOT NULL,
                    description     TEXT NOT NULL DEFAULT '',
                    blueprint_spec  TEXT NOT NULL,
                    created_at      INTEGER NOT NULL,
                    UNIQUE (name, version)
                );
                CREATE INDEX IF NOT EXISTS idx_workflows_name ON workflows(name);

                CREATE TABLE IF NOT EXISTS processes (
                    id                  TEXT PRIMARY KEY,
                    workflow_id         TEXT NOT NULL,
                    workflow_name       TEXT NOT NULL,
                    blueprint_spec      TEXT NOT NULL,
                    current_state_id    TEXT,
                    current_status      TEXT,
                    version             INTEGER NOT NULL DEFAULT 0,
                    created_at          INTEGER NOT NULL,
                    updated_at          INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_processes_workflow ON processes(workflow_name);
                CREATE INDEX IF NOT EXISTS idx_processes_status ON processes(current_status);

                CREATE TABLE IF NOT EXISTS process_states (
                    id              TEXT PRIMARY KEY,
                    process_id      TEXT NOT NULL REFERENCES processes(id) ON DELETE CASCADE,
                    step_number     INTEGER NOT NULL,
                    node_id         TEXT NOT NULL,
                    next_node_id    TEXT,
                    bag             TEXT NOT NULL DEFAULT '{}',
                    external_input  TEXT,
                    result          TEXT,
                    error           TEXT,
                    status          TEXT NOT NULL,
                    actor_data      TEXT,
                    time_elapsed    INTEGER,
                    engine_id       TEXT NOT NULL,
                    created_at      INTEGER NOT NULL,
                    UNIQUE (process_id, step_number)
                );
                CREATE INDEX IF NOT EXISTS idx_process_states_process ON process_states(process_id);

                CREATE TABLE IF NOT EXISTS activity_managers (
                    id                  TEXT PRIMARY KEY,
                    process_id          TEXT NOT NULL REFERENCES processes(id) ON DELETE CASCADE,
                    process_state_id    TEXT NOT NULL,
                    type                TEXT NOT NULL DEFAULT 'commit',
                    status              TEXT NOT NULL DEFAULT 'started',
                    props               TEXT NOT NULL DEFAULT '{}',
                    parameters          TEXT NOT NULL DEFAULT '{}',
                    activities          TEXT NOT NULL DEFAULT '[]',
                    created_at          INTEGER NOT NULL,
                    updated_at          INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_activity_managers_process ON activity_managers(process_id);

                CREATE TABLE IF NOT EXISTS timers (
                    id              TEXT PRIMARY KEY,
                    resource_type   TEXT NOT NULL,
                    resource_id     TEXT NOT NULL,
                    expires_at      INTEGER NOT NULL,
                    params          TEXT NOT NULL DEFAULT '{}',
                    active          INTEGER NOT NULL DEFAULT 1,
                    fired_at        INTEGER,
                    created_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_timers_due ON timers(expires_at) WHERE active = 1;
                CREATE INDEX IF NOT EXISTS idx_timers_resource ON timers(resource_type, resource_id);
                ",
            )
        })
    }
}
