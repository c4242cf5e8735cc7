use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::OptionalExtension;

use super::activity_manager_store::insert_activity_manager;
use super::process_state_store::{insert_state, last_step_number};
use super::timer_store::insert_timer;
use super::to_dt;
use crate::blueprint::BlueprintSpec;
use crate::db::Database;
use crate::error::EngineError;
use crate::models::{ActivityManager, ProcessFilters, ProcessRecord, ProcessState, ProcessStatus, Timer};

const SELECT_PROCESS: &str = "SELECT id, workflow_id, workflow_name, blueprint_spec, \
     current_state_id, current_status, version, created_at, updated_at FROM processes";

/// What the pre-step lock check found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockProbe {
    pub version: i64,
    pub next_step_number: i64,
}

/// A delegated child process, inserted with the step that delegates to it.
#[derive(Debug, Clone)]
pub struct ChildProcess {
    pub record: ProcessRecord,
    pub state: ProcessState,
}

/// Everything one step writes, committed atomically.
#[derive(Debug, Clone)]
pub struct StepCommit {
    pub process_id: String,
    /// State the writer believes is current.
    pub expected_state_id: String,
    pub expected_version: i64,
    pub state: ProcessState,
    pub activity_manager: Option<ActivityManager>,
    pub timers: Vec<Timer>,
    pub child: Option<ChildProcess>,
}

impl StepCommit {
    pub fn new(process_id: &str, expected_state_id: &str, expected_version: i64, state: ProcessState) -> Self {
        Self {
            process_id: process_id.to_string(),
            expected_state_id: expected_state_id.to_string(),
            expected_version,
            state,
            activity_manager: None,
            timers: Vec::new(),
            child: None,
        }
    }
}

#[derive(Clone)]
pub struct ProcessStore {
    db: Database,
}

impl ProcessStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new process together with its first state.
    pub async fn insert_with_state(
        &self,
        record: ProcessRecord,
        state: ProcessState,
    ) -> Result<(), EngineError> {
        self.db
            .with_tx_async(move |tx| insert_process(tx, &record, &state))
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<ProcessRecord>, EngineError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("{} WHERE id = ?1", SELECT_PROCESS),
                    rusqlite::params![id],
                    row_to_process,
                )
                .optional()
            })
            .await
    }

    pub async fn list(&self, filters: &ProcessFilters) -> Result<Vec<ProcessRecord>, EngineError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();
        for (column, values) in [
            ("workflow_name", &filters.workflow_name),
            ("workflow_id", &filters.workflow_id),
            ("id", &filters.process_id),
            ("current_status", &filters.current_status),
        ] {
            let Some(values) = values else { continue };
            let values = values.values();
            if values.is_empty() {
                continue;
            }
            let placeholders = vec!["?"; values.len()].join(", ");
            clauses.push(format!("{} IN ({})", column, placeholders));
            params.extend(values.into_iter().map(SqlValue::Text));
        }

        let mut sql = SELECT_PROCESS.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id");
        match (filters.limit, filters.offset) {
            (Some(limit), offset) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit.max(0), offset.unwrap_or(0).max(0)))
            }
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset.max(0))),
            (None, None) => {}
        }

        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params), row_to_process)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Non-blocking check that `state_id` is still the current state of the
    /// process and that the state row exists. `None` means another writer
    /// moved the process on.
    pub async fn lock_probe(
        &self,
        process_id: &str,
        state_id: &str,
    ) -> Result<Option<LockProbe>, EngineError> {
        let process_id = process_id.to_string();
        let state_id = state_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let version: Option<i64> = conn
                    .query_row(
                        "SELECT version FROM processes WHERE id = ?1 AND current_state_id = ?2",
                        rusqlite::params![process_id, state_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(version) = version else {
                    return Ok(None);
                };
                let state_exists: bool = conn
                    .query_row(
                        "SELECT 1 FROM process_states WHERE id = ?1 AND process_id = ?2",
                        rusqlite::params![state_id, process_id],
                        |_| Ok(true),
                    )
                    .optional()?
                    .unwrap_or(false);
                if !state_exists {
                    return Ok(None);
                }
                let next_step_number = last_step_number(conn, &process_id)? + 1;
                Ok(Some(LockProbe {
                    version,
                    next_step_number,
                }))
            })
            .await
    }

    /// Append a state and move the process pointer to it.
    ///
    /// The pointer moves only if the process is still at
    /// `expected_state_id`/`expected_version`; otherwise the whole write is
    /// rolled back with `LockUnavailable`. A state whose step number is not
    /// the next one is rejected with `Conflict`. Returns the new version.
    pub async fn commit_step(&self, commit: StepCommit) -> Result<i64, EngineError> {
        self.db
            .with_tx_async(move |tx| {
                let now = Utc::now().timestamp_millis();
                let moved = tx.execute(
                    "UPDATE processes SET current_state_id = ?1, current_status = ?2, \
                     version = version + 1, updated_at = ?3 \
                     WHERE id = ?4 AND current_state_id = ?5 AND version = ?6",
                    rusqlite::params![
                        commit.state.id,
                        commit.state.status.as_str(),
                        now,
                        commit.process_id,
                        commit.expected_state_id,
                        commit.expected_version,
                    ],
                )?;
                if moved == 0 {
                    return Err(EngineError::LockUnavailable(format!(
                        "No process found for lock, process_id [{}] current_state_id [{}]",
                        commit.process_id, commit.expected_state_id
                    )));
                }

                let expected_step = last_step_number(tx, &commit.process_id)? + 1;
                if commit.state.step_number != expected_step {
                    return Err(EngineError::Conflict(format!(
                        "Process [{}] on invalid step: {} != {}",
                        commit.process_id, commit.state.step_number, expected_step
                    )));
                }
                insert_state(tx, &commit.state)?;

                if let Some(am) = &commit.activity_manager {
                    insert_activity_manager(tx, am)?;
                }
                for timer in &commit.timers {
                    insert_timer(tx, timer)?;
                }
                if let Some(child) = &commit.child {
                    insert_process(tx, &child.record, &child.state)?;
                }
                Ok(commit.expected_version + 1)
            })
            .await
    }
}

/// Insert a process row pointing at `state`, plus the state itself.
fn insert_process(
    tx: &rusqlite::Transaction<'_>,
    record: &ProcessRecord,
    state: &ProcessState,
) -> Result<(), EngineError> {
    let spec = serde_json::to_string(&record.blueprint_spec)
        .map_err(|e| EngineError::Internal(format!("Failed to encode blueprint: {}", e)))?;
    tx.execute(
        "INSERT INTO processes (id, workflow_id, workflow_name, blueprint_spec, \
         current_state_id, current_status, version, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            record.id,
            record.workflow_id,
            record.workflow_name,
            spec,
            state.id,
            state.status.as_str(),
            record.version,
            record.created_at.timestamp_millis(),
            record.updated_at.timestamp_millis(),
        ],
    )?;
    insert_state(tx, state)?;
    Ok(())
}

fn row_to_process(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessRecord> {
    let spec_text: String = row.get(3)?;
    let blueprint_spec: BlueprintSpec = serde_json::from_str(&spec_text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status: Option<String> = row.get(5)?;
    Ok(ProcessRecord {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        workflow_name: row.get(2)?,
        blueprint_spec,
        current_state_id: row.get(4)?,
        current_status: status.as_deref().and_then(ProcessStatus::parse),
        version: row.get(6)?,
        created_at: to_dt(row.get(7)?),
        updated_at: to_dt(row.get(8)?),
    })
}
