use chrono::Utc;
use rusqlite::OptionalExtension;

use super::to_dt;
use crate::blueprint::BlueprintSpec;
use crate::db::Database;
use crate::error::EngineError;
use crate::models::Workflow;

const SELECT_WORKFLOW: &str =
    "SELECT id, name, version, description, blueprint_spec, created_at FROM workflows";

#[derive(Clone)]
pub struct WorkflowStore {
    db: Database,
}

impl WorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new version of the workflow; the version is `latest + 1`.
    pub async fn save(&self, workflow: Workflow) -> Result<Workflow, EngineError> {
        let spec = serde_json::to_string(&workflow.blueprint_spec)
            .map_err(|e| EngineError::Internal(format!("Failed to encode blueprint: {}", e)))?;
        self.db
            .with_tx_async(move |tx| {
                let latest: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(version), 0) FROM workflows WHERE name = ?1",
                    rusqlite::params![workflow.name],
                    |row| row.get(0),
                )?;
                let saved = Workflow {
                    version: latest + 1,
                    ..workflow
                };
                tx.execute(
                    "INSERT INTO workflows (id, name, version, description, blueprint_spec, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        saved.id,
                        saved.name,
                        saved.version,
                        saved.description,
                        spec,
                        saved.created_at.timestamp_millis(),
                    ],
                )?;
                Ok(saved)
            })
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Workflow>, EngineError> {
        let id = id.to_string();
        let row = self
            .db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("{} WHERE id = ?1", SELECT_WORKFLOW),
                    rusqlite::params![id],
                    row_to_workflow,
                )
                .optional()
            })
            .await?;
        row.map(WorkflowRow::into_workflow).transpose()
    }

    /// Latest version of the named workflow.
    pub async fn fetch_by_name(&self, name: &str) -> Result<Option<Workflow>, EngineError> {
        let name = name.to_string();
        let row = self
            .db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!(
                        "{} WHERE name = ?1 ORDER BY version DESC LIMIT 1",
                        SELECT_WORKFLOW
                    ),
                    rusqlite::params![name],
                    row_to_workflow,
                )
                .optional()
            })
            .await?;
        row.map(WorkflowRow::into_workflow).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Workflow>, EngineError> {
        let rows = self
            .db
            .with_conn_async(|conn| {
                let mut stmt =
                    conn.prepare(&format!("{} ORDER BY name, version DESC", SELECT_WORKFLOW))?;
                let rows = stmt
                    .query_map([], row_to_workflow)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().map(WorkflowRow::into_workflow).collect()
    }
}

struct WorkflowRow {
    workflow: Workflow,
    spec_text: String,
}

impl WorkflowRow {
    fn into_workflow(self) -> Result<Workflow, EngineError> {
        let blueprint_spec: BlueprintSpec = serde_json::from_str(&self.spec_text).map_err(|e| {
            EngineError::Internal(format!(
                "Stored blueprint of workflow {} is unreadable: {}",
                self.workflow.id, e
            ))
        })?;
        Ok(Workflow {
            blueprint_spec,
            ..self.workflow
        })
    }
}

fn row_to_workflow(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowRow> {
    Ok(WorkflowRow {
        workflow: Workflow {
            id: row.get(0)?,
            name: row.get(1)?,
            version: row.get(2)?,
            description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            blueprint_spec: BlueprintSpec::default(),
            created_at: row
                .get::<_, i64>(5)
                .map(to_dt)
                .unwrap_or_else(|_| Utc::now()),
        },
        spec_text: row.get(4)?,
    })
}
