use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use super::{json_col, to_dt};
use crate::db::Database;
use crate::error::EngineError;
use crate::models::{Activity, ActivityManager, ActivityManagerType, ActivityStatus};

const SELECT_AM: &str = "SELECT id, process_id, process_state_id, type, status, props, \
     parameters, activities, created_at, updated_at FROM activity_managers";

#[derive(Clone)]
pub struct ActivityManagerStore {
    db: Database,
}

impl ActivityManagerStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save(&self, am: ActivityManager) -> Result<ActivityManager, EngineError> {
        let saved = am.clone();
        self.db
            .with_conn_async(move |conn| insert_activity_manager(conn, &am))
            .await?;
        Ok(saved)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ActivityManager>, EngineError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("{} WHERE id = ?1", SELECT_AM),
                    rusqlite::params![id],
                    row_to_activity_manager,
                )
                .optional()
            })
            .await
    }

    /// Most recent activity manager of a process, optionally in one status.
    pub async fn fetch_for_process(
        &self,
        process_id: &str,
        status: Option<ActivityStatus>,
    ) -> Result<Option<ActivityManager>, EngineError> {
        let process_id = process_id.to_string();
        let status = status.map(|s| s.as_str());
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!(
                        "{} WHERE process_id = ?1 AND (?2 IS NULL OR status = ?2) \
                         ORDER BY created_at DESC, rowid DESC LIMIT 1",
                        SELECT_AM
                    ),
                    rusqlite::params![process_id, status],
                    row_to_activity_manager,
                )
                .optional()
            })
            .await
    }

    pub async fn list_for_process(&self, process_id: &str) -> Result<Vec<ActivityManager>, EngineError> {
        let process_id = process_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE process_id = ?1 ORDER BY created_at ASC, rowid ASC",
                    SELECT_AM
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![process_id], row_to_activity_manager)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Move one activity manager from `from` to `to`. False if it was not in `from`.
    pub async fn transition(
        &self,
        id: &str,
        from: ActivityStatus,
        to: ActivityStatus,
    ) -> Result<bool, EngineError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "UPDATE activity_managers SET status = ?1, updated_at = ?2 \
                     WHERE id = ?3 AND status = ?4",
                    rusqlite::params![to.as_str(), Utc::now().timestamp_millis(), id, from.as_str()],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Interrupt every started activity manager of the process.
    pub async fn interrupt_for_process(&self, process_id: &str) -> Result<usize, EngineError> {
        self.close_started_for_process(process_id, ActivityStatus::Interrupted)
            .await
    }

    /// Mark every started activity manager of the process as completed.
    pub async fn finish_for_process(&self, process_id: &str) -> Result<usize, EngineError> {
        self.close_started_for_process(process_id, ActivityStatus::Completed)
            .await
    }

    async fn close_started_for_process(
        &self,
        process_id: &str,
        to: ActivityStatus,
    ) -> Result<usize, EngineError> {
        let process_id = process_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE activity_managers SET status = ?1, updated_at = ?2 \
                     WHERE process_id = ?3 AND status = 'started'",
                    rusqlite::params![to.as_str(), Utc::now().timestamp_millis(), process_id],
                )
            })
            .await
    }

    /// Record a submission and complete the manager, only if it is still started.
    pub async fn complete(
        &self,
        id: &str,
        activity: Activity,
    ) -> Result<Option<ActivityManager>, EngineError> {
        let id = id.to_string();
        self.db
            .with_tx_async(move |tx| {
                let current = tx
                    .query_row(
                        &format!("{} WHERE id = ?1", SELECT_AM),
                        rusqlite::params![id],
                        row_to_activity_manager,
                    )
                    .optional()?;
                let Some(mut am) = current else {
                    return Ok(None);
                };
                if am.status != ActivityStatus::Started {
                    return Ok(None);
                }
                am.activities.push(activity);
                am.status = ActivityStatus::Completed;
                am.updated_at = Utc::now();
                let activities = serde_json::to_string(&am.activities)
                    .map_err(|e| EngineError::Internal(format!("Failed to encode activities: {}", e)))?;
                tx.execute(
                    "UPDATE activity_managers SET status = ?1, activities = ?2, updated_at = ?3 \
                     WHERE id = ?4 AND status = 'started'",
                    rusqlite::params![
                        am.status.as_str(),
                        activities,
                        am.updated_at.timestamp_millis(),
                        am.id,
                    ],
                )?;
                Ok(Some(am))
            })
            .await
    }
}

pub(crate) fn insert_activity_manager(conn: &Connection, am: &ActivityManager) -> rusqlite::Result<()> {
    let to_text = |v: Result<String, serde_json::Error>| {
        v.map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
    };
    let parameters = to_text(serde_json::to_string(&am.parameters))?;
    let activities = to_text(serde_json::to_string(&am.activities))?;
    conn.execute(
        "INSERT INTO activity_managers (id, process_id, process_state_id, type, status, props, \
         parameters, activities, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            am.id,
            am.process_id,
            am.process_state_id,
            am.am_type.as_str(),
            am.status.as_str(),
            am.props.to_string(),
            parameters,
            activities,
            am.created_at.timestamp_millis(),
            am.updated_at.timestamp_millis(),
        ],
    )?;
    Ok(())
}

fn row_to_activity_manager(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityManager> {
    let am_type: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(ActivityManager {
        id: row.get(0)?,
        process_id: row.get(1)?,
        process_state_id: row.get(2)?,
        am_type: ActivityManagerType::from_str(&am_type),
        status: ActivityStatus::from_str(&status),
        props: json_col(row.get(5)?),
        parameters: serde_json::from_value(json_col(row.get(6)?)).unwrap_or_default(),
        activities: serde_json::from_value(json_col(row.get(7)?)).unwrap_or_default(),
        created_at: to_dt(row.get(8)?),
        updated_at: to_dt(row.get(9)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActivityManagerParameters;
    use serde_json::json;

    async fn store_with_process() -> ActivityManagerStore {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO processes (id, workflow_id, workflow_name, blueprint_spec, created_at, updated_at) \
                 VALUES ('p1', 'w', 'flow', '{}', 0, 0)",
                [],
            )
        })
        .unwrap();
        ActivityManagerStore::new(db)
    }

    fn am() -> ActivityManager {
        ActivityManager::new(
            "p1",
            "s1",
            ActivityManagerType::Commit,
            json!({ "action": "REVIEW" }),
            ActivityManagerParameters {
                timeout: Some(30),
                next_step_number: Some(4),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_save_and_fetch() {
        let store = store_with_process().await;
        let saved = store.save(am()).await.unwrap();

        let fetched = store.get(&saved.id).await.unwrap().unwrap();
        assert_eq!(fetched.props["action"], "REVIEW");
        assert_eq!(fetched.parameters.next_step_number, Some(4));
        assert_eq!(fetched.status, ActivityStatus::Started);

        let started = store
            .fetch_for_process("p1", Some(ActivityStatus::Started))
            .await
            .unwrap();
        assert_eq!(started.map(|a| a.id), Some(saved.id.clone()));
        assert!(store
            .fetch_for_process("p1", Some(ActivityStatus::Completed))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_complete_only_once() {
        let store = store_with_process().await;
        let saved = store.save(am()).await.unwrap();
        let activity = Activity {
            id: "a1".into(),
            actor_data: json!({ "id": "u1" }),
            data: json!({ "approved": true }),
            created_at: Utc::now(),
        };

        let completed = store.complete(&saved.id, activity.clone()).await.unwrap().unwrap();
        assert_eq!(completed.status, ActivityStatus::Completed);
        assert_eq!(completed.activities.len(), 1);
        assert!(store.complete(&saved.id, activity).await.unwrap().is_none());

        let fetched = store.get(&saved.id).await.unwrap().unwrap();
        assert_eq!(fetched.activities[0].data["approved"], true);
    }

    #[tokio::test]
    async fn test_interrupt_and_finish_for_process() {
        let store = store_with_process().await;
        let first = store.save(am()).await.unwrap();
        assert_eq!(store.interrupt_for_process("p1").await.unwrap(), 1);
        assert_eq!(
            store.get(&first.id).await.unwrap().unwrap().status,
            ActivityStatus::Interrupted
        );
        // Already closed managers are left alone.
        assert_eq!(store.finish_for_process("p1").await.unwrap(), 0);

        let second = store.save(am()).await.unwrap();
        assert!(store
            .transition(&second.id, ActivityStatus::Started, ActivityStatus::Expired)
            .await
            .unwrap());
        assert!(!store
            .transition(&second.id, ActivityStatus::Started, ActivityStatus::Expired)
            .await
            .unwrap());
        assert_eq!(store.list_for_process("p1").await.unwrap().len(), 2);
    }
}
