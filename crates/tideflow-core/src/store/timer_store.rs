use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::{json_col, to_dt, to_opt_dt};
use crate::db::Database;
use crate::error::EngineError;
use crate::models::{Timer, TimerResource};

const SELECT_TIMER: &str = "SELECT id, resource_type, resource_id, expires_at, params, active, \
     fired_at, created_at FROM timers";

#[derive(Clone)]
pub struct TimerStore {
    db: Database,
}

impl TimerStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, timer: Timer) -> Result<Timer, EngineError> {
        let saved = timer.clone();
        self.db
            .with_conn_async(move |conn| insert_timer(conn, &timer))
            .await?;
        Ok(saved)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Timer>, EngineError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("{} WHERE id = ?1", SELECT_TIMER),
                    rusqlite::params![id],
                    row_to_timer,
                )
                .optional()
            })
            .await
    }

    /// Active timers due at or before `now`, oldest first.
    pub async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Timer>, EngineError> {
        let now_ms = now.timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE active = 1 AND expires_at <= ?1 ORDER BY expires_at ASC",
                    SELECT_TIMER
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![now_ms], row_to_timer)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_for_resource(
        &self,
        resource_type: TimerResource,
        resource_id: &str,
    ) -> Result<Vec<Timer>, EngineError> {
        let resource_id = resource_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE resource_type = ?1 AND resource_id = ?2 ORDER BY expires_at ASC",
                    SELECT_TIMER
                ))?;
                let rows = stmt
                    .query_map(
                        rusqlite::params![resource_type.as_str(), resource_id],
                        row_to_timer,
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Take the timer for firing. Only one caller ever gets `true`.
    pub async fn claim(&self, id: &str) -> Result<bool, EngineError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "UPDATE timers SET active = 0, fired_at = ?1 WHERE id = ?2 AND active = 1",
                    rusqlite::params![Utc::now().timestamp_millis(), id],
                )?;
                Ok(n == 1)
            })
            .await
    }

    /// Put a claimed timer back so it fires again on the next poll.
    pub async fn release(&self, id: &str) -> Result<(), EngineError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE timers SET active = 1, fired_at = NULL WHERE id = ?1",
                    rusqlite::params![id],
                )?;
                Ok(())
            })
            .await
    }
}

pub(crate) fn insert_timer(conn: &Connection, timer: &Timer) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO timers (id, resource_type, resource_id, expires_at, params, active, fired_at, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            timer.id,
            timer.resource_type.as_str(),
            timer.resource_id,
            timer.expires_at.timestamp_millis(),
            timer.params.to_string(),
            timer.active as i64,
            timer.fired_at.map(|t| t.timestamp_millis()),
            timer.created_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn row_to_timer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Timer> {
    let resource_type: String = row.get(1)?;
    Ok(Timer {
        id: row.get(0)?,
        resource_type: TimerResource::from_str(&resource_type),
        resource_id: row.get(2)?,
        expires_at: to_dt(row.get(3)?),
        params: json_col(row.get(4)?),
        active: row.get::<_, i64>(5)? != 0,
        fired_at: to_opt_dt(row.get(6)?),
        created_at: to_dt(row.get(7)?),
    })
}
