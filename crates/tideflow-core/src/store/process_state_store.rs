use rusqlite::{Connection, OptionalExtension};

use super::{json_col, opt_json_col, to_dt, to_json_text};
use crate::db::Database;
use crate::error::EngineError;
use crate::models::{ProcessState, ProcessStatus};

const SELECT_STATE: &str = "SELECT id, process_id, step_number, node_id, next_node_id, bag, \
     external_input, result, error, status, actor_data, time_elapsed, engine_id, created_at \
     FROM process_states";

/// Read side of the append-only step history. Writes happen inside the
/// step commit, see [`crate::store::ProcessStore::commit_step`].
#[derive(Clone)]
pub struct ProcessStateStore {
    db: Database,
}

impl ProcessStateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: &str) -> Result<Option<ProcessState>, EngineError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("{} WHERE id = ?1", SELECT_STATE),
                    rusqlite::params![id],
                    row_to_state,
                )
                .optional()
            })
            .await
    }

    pub async fn get_last_state_by_process(
        &self,
        process_id: &str,
    ) -> Result<Option<ProcessState>, EngineError> {
        let process_id = process_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!(
                        "{} WHERE process_id = ?1 ORDER BY step_number DESC LIMIT 1",
                        SELECT_STATE
                    ),
                    rusqlite::params![process_id],
                    row_to_state,
                )
                .optional()
            })
            .await
    }

    /// Highest persisted step number, 0 when the process has no states.
    pub async fn get_last_step_number(&self, process_id: &str) -> Result<i64, EngineError> {
        let process_id = process_id.to_string();
        self.db
            .with_conn_async(move |conn| last_step_number(conn, &process_id))
            .await
    }

    pub async fn get_state_history_by_process(
        &self,
        process_id: &str,
    ) -> Result<Vec<ProcessState>, EngineError> {
        let process_id = process_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE process_id = ?1 ORDER BY step_number ASC",
                    SELECT_STATE
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![process_id], row_to_state)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

pub(crate) fn last_step_number(conn: &Connection, process_id: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(step_number), 0) FROM process_states WHERE process_id = ?1",
        rusqlite::params![process_id],
        |row| row.get(0),
    )
}

pub(crate) fn insert_state(conn: &Connection, state: &ProcessState) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO process_states (id, process_id, step_number, node_id, next_node_id, bag, \
         external_input, result, error, status, actor_data, time_elapsed, engine_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        rusqlite::params![
            state.id,
            state.process_id,
            state.step_number,
            state.node_id,
            state.next_node_id,
            to_json_text(&state.bag),
            state.external_input.as_ref().map(to_json_text),
            state.result.as_ref().map(to_json_text),
            state.error,
            state.status.as_str(),
            state.actor_data.as_ref().map(to_json_text),
            state.time_elapsed,
            state.engine_id,
            state.created_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessState> {
    let status: String = row.get(9)?;
    Ok(ProcessState {
        id: row.get(0)?,
        process_id: row.get(1)?,
        step_number: row.get(2)?,
        node_id: row.get(3)?,
        next_node_id: row.get(4)?,
        bag: json_col(row.get(5)?),
        external_input: opt_json_col(row.get(6)?),
        result: opt_json_col(row.get(7)?),
        error: row.get(8)?,
        status: ProcessStatus::parse(&status).unwrap_or(ProcessStatus::Error),
        actor_data: opt_json_col(row.get(10)?),
        time_elapsed: row.get(11)?,
        engine_id: row.get(12)?,
        created_at: to_dt(row.get(13)?),
    })
}
