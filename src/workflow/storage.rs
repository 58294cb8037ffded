//! SQLite persistence layer for workflows, triggers, executions and logs
//!
//! Graph definitions, trigger configs and payloads are stored as JSON text while
//! the fields the runtime filters on (status, type, activity) get real columns.

use crate::workflow::execution::{
    ExecutionLogEntry, ExecutionStatus, TriggeredBy, WorkflowExecution,
};
use crate::workflow::trigger::{TriggerType, WorkflowTrigger};
use crate::workflow::types::{Workflow, WorkflowStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row, Sqlite, Transaction,
};
use std::str::FromStr;

/// SQLite-based store for everything the workflow runtime persists
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    /// SQLite connection pool for the workflow database
    pool: SqlitePool,
}

impl WorkflowStorage {
    /// Create new storage instance with database connection
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `database_url`, creating the file and its
    /// directory if missing, and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL '{}'", database_url))?
            .create_if_missing(true);

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory '{}'", parent.display())
                })?;
            }
        }

        tracing::info!("🗄️ Opening workflow database: {}", options.get_filename().display());
        let pool = SqlitePool::connect_with(options).await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Private in-memory database (single connection so every query sees the
    /// same data). Used by tests and throwaway runs.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Close the pool; every later query fails. Lets callers simulate an
    /// unreachable store.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Initialize the schema. Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                artist_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                category TEXT NOT NULL,
                status TEXT NOT NULL,
                definition TEXT NOT NULL,
                tags TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_triggers (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                type TEXT NOT NULL,
                config TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                paused_by_workflow INTEGER NOT NULL DEFAULT 0,
                last_fired_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Executions outlive their workflow, so no foreign key here
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                triggered_by TEXT NOT NULL,
                trigger_data TEXT NOT NULL,
                started_at TIMESTAMP NOT NULL,
                completed_at TIMESTAMP,
                error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_execution_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL REFERENCES workflow_executions(id) ON DELETE CASCADE,
                seq INTEGER NOT NULL,
                timestamp TIMESTAMP NOT NULL,
                node_id TEXT NOT NULL,
                action TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_workflows_artist ON workflows(artist_id)",
            "CREATE INDEX IF NOT EXISTS idx_triggers_workflow ON workflow_triggers(workflow_id)",
            "CREATE INDEX IF NOT EXISTS idx_triggers_type_active ON workflow_triggers(type, is_active)",
            "CREATE INDEX IF NOT EXISTS idx_executions_workflow ON workflow_executions(workflow_id, started_at)",
            "CREATE INDEX IF NOT EXISTS idx_logs_execution ON workflow_execution_logs(execution_id, seq)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Workflows
    // ------------------------------------------------------------------

    pub async fn create_workflow(&self, workflow: &Workflow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, artist_id, name, description, category, status, definition, tags, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.artist_id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.category.as_str())
        .bind(workflow.status.as_str())
        .bind(serde_json::to_string(&workflow.definition)?)
        .bind(serde_json::to_string(&workflow.tags)?)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieve a workflow by ID
    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    /// List workflows, newest first, optionally restricted to one artist
    pub async fn list_workflows(&self, artist_id: Option<&str>) -> Result<Vec<Workflow>> {
        let rows = match artist_id {
            Some(artist_id) => {
                sqlx::query("SELECT * FROM workflows WHERE artist_id = ? ORDER BY updated_at DESC")
                    .bind(artist_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM workflows ORDER BY updated_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(workflow_from_row).collect()
    }

    /// Update the authored fields of a workflow. Status is changed only via
    /// [`WorkflowStorage::set_workflow_status`].
    pub async fn update_workflow(&self, workflow: &Workflow) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET name = ?, description = ?, category = ?, definition = ?, tags = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.category.as_str())
        .bind(serde_json::to_string(&workflow.definition)?)
        .bind(serde_json::to_string(&workflow.tags)?)
        .bind(Utc::now())
        .bind(&workflow.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Change a workflow's status.
    ///
    /// Pausing deactivates the workflow's active triggers and marks them as
    /// held by the pause; activating re-enables exactly those. Triggers the
    /// owner switched off stay off. Both happen in the same transaction as
    /// the status change.
    pub async fn set_workflow_status(&self, id: &str, status: WorkflowStatus) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE workflows SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let held_triggers = match status {
            WorkflowStatus::Paused => Some(
                "UPDATE workflow_triggers SET is_active = 0, paused_by_workflow = 1
                 WHERE workflow_id = ? AND is_active = 1",
            ),
            WorkflowStatus::Active => Some(
                "UPDATE workflow_triggers SET is_active = 1, paused_by_workflow = 0
                 WHERE workflow_id = ? AND paused_by_workflow = 1",
            ),
            WorkflowStatus::Draft => None,
        };
        if let Some(statement) = held_triggers {
            sqlx::query(statement).bind(id).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Delete a workflow and (by cascade) its triggers. Execution history is kept.
    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------

    /// Insert a trigger. On a paused workflow an active trigger is stored
    /// off and held by the pause until the workflow is activated again.
    pub async fn create_trigger(&self, trigger: &WorkflowTrigger) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO workflow_triggers (id, workflow_id, type, config, is_active, last_fired_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trigger.id)
        .bind(&trigger.workflow_id)
        .bind(trigger.trigger_type.as_str())
        .bind(serde_json::to_string(&trigger.config)?)
        .bind(trigger.is_active)
        .bind(trigger.last_fired_at)
        .bind(trigger.created_at)
        .execute(&mut *tx)
        .await?;
        hold_if_workflow_paused(&mut tx, &trigger.id).await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_trigger(&self, id: &str) -> Result<Option<WorkflowTrigger>> {
        let row = sqlx::query("SELECT * FROM workflow_triggers WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(trigger_from_row).transpose()
    }

    pub async fn list_triggers(&self, workflow_id: &str) -> Result<Vec<WorkflowTrigger>> {
        let rows = sqlx::query("SELECT * FROM workflow_triggers WHERE workflow_id = ? ORDER BY created_at, id")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(trigger_from_row).collect()
    }

    /// Replace a trigger's config and, when given, the owner's activity flag.
    /// Switching a trigger on while its workflow is paused holds it until
    /// the workflow is activated.
    pub async fn update_trigger(&self, id: &str, config: &Value, is_active: Option<bool>) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE workflow_triggers SET config = ? WHERE id = ?")
            .bind(serde_json::to_string(config)?)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if let Some(is_active) = is_active {
            sqlx::query("UPDATE workflow_triggers SET is_active = ?, paused_by_workflow = 0 WHERE id = ?")
                .bind(is_active)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            hold_if_workflow_paused(&mut tx, id).await?;
        }

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_trigger_active(&self, id: &str, is_active: bool) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE workflow_triggers SET is_active = ?, paused_by_workflow = 0 WHERE id = ?")
            .bind(is_active)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        hold_if_workflow_paused(&mut tx, id).await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_trigger(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflow_triggers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All active schedule triggers whose workflow is active
    pub async fn get_active_schedule_triggers(&self) -> Result<Vec<WorkflowTrigger>> {
        let rows = sqlx::query(
            r#"
            SELECT t.* FROM workflow_triggers t
            JOIN workflows w ON w.id = t.workflow_id
            WHERE t.type = 'schedule' AND t.is_active = 1 AND w.status = 'active'
            ORDER BY t.created_at, t.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(trigger_from_row).collect()
    }

    /// Active event triggers listening for `event_type` on the artist's active workflows
    pub async fn get_active_event_triggers(
        &self,
        event_type: &str,
        artist_id: &str,
    ) -> Result<Vec<WorkflowTrigger>> {
        let rows = sqlx::query(
            r#"
            SELECT t.* FROM workflow_triggers t
            JOIN workflows w ON w.id = t.workflow_id
            WHERE t.type = 'event' AND t.is_active = 1 AND w.status = 'active'
              AND w.artist_id = ? AND json_extract(t.config, '$.eventType') = ?
            ORDER BY t.created_at, t.id
            "#,
        )
        .bind(artist_id)
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(trigger_from_row).collect()
    }

    /// Stamp `last_fired_at`. Observability only, never used for dedup.
    pub async fn record_trigger_fired(&self, trigger_id: &str) -> Result<()> {
        sqlx::query("UPDATE workflow_triggers SET last_fired_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(trigger_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Executions
    // ------------------------------------------------------------------

    /// Insert a new execution in `running` state
    pub async fn create_execution(
        &self,
        workflow_id: &str,
        triggered_by: TriggeredBy,
        trigger_data: &Value,
    ) -> Result<WorkflowExecution> {
        let execution = WorkflowExecution {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Running,
            triggered_by,
            trigger_data: trigger_data.clone(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        };
        self.insert_execution(&execution).await?;
        Ok(execution)
    }

    /// Insert an execution that failed before any node ran
    pub async fn create_failed_execution(
        &self,
        workflow_id: &str,
        triggered_by: TriggeredBy,
        trigger_data: &Value,
        error: &str,
    ) -> Result<String> {
        let now = Utc::now();
        let execution = WorkflowExecution {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Failed,
            triggered_by,
            trigger_data: trigger_data.clone(),
            started_at: now,
            completed_at: Some(now),
            error: Some(error.to_string()),
        };
        self.insert_execution(&execution).await?;
        Ok(execution.id)
    }

    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions
                (id, workflow_id, status, triggered_by, trigger_data, started_at, completed_at, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(&execution.workflow_id)
        .bind(execution.status.as_str())
        .bind(execution.triggered_by.as_str())
        .bind(serde_json::to_string(&execution.trigger_data)?)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(&execution.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write the final status together with the whole log in one transaction.
    ///
    /// Returns `false` (and writes nothing) when the execution is unknown or
    /// already terminal: a finished execution is never rewritten.
    pub async fn finish_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        logs: &[ExecutionLogEntry],
        error: Option<&str>,
    ) -> Result<bool> {
        anyhow::ensure!(status.is_terminal(), "Cannot finish execution with status {}", status.as_str());

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_executions SET status = ?, completed_at = ?, error = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(error)
        .bind(execution_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }

        for (seq, entry) in logs.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO workflow_execution_logs (execution_id, seq, timestamp, node_id, action, status, error)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(execution_id)
            .bind(seq as i64)
            .bind(entry.timestamp)
            .bind(&entry.node_id)
            .bind(&entry.action)
            .bind(entry.status.as_str())
            .bind(&entry.error)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn get_execution(&self, id: &str) -> Result<Option<WorkflowExecution>> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(execution_from_row).transpose()
    }

    /// Most recent executions of a workflow first
    pub async fn list_executions(&self, workflow_id: &str, limit: u32) -> Result<Vec<WorkflowExecution>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_executions WHERE workflow_id = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(workflow_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    /// Log entries of one execution in the order they were written
    pub async fn get_execution_logs(&self, execution_id: &str) -> Result<Vec<ExecutionLogEntry>> {
        let rows = sqlx::query("SELECT * FROM workflow_execution_logs WHERE execution_id = ? ORDER BY seq")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ExecutionLogEntry {
                    timestamp: row.try_get("timestamp")?,
                    node_id: row.try_get("node_id")?,
                    action: row.try_get("action")?,
                    status: row.try_get::<String, _>("status")?.parse()?,
                    error: row.try_get("error")?,
                })
            })
            .collect()
    }
}

/// Switch an active trigger off and mark it held when its workflow is paused
async fn hold_if_workflow_paused(tx: &mut Transaction<'_, Sqlite>, trigger_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE workflow_triggers SET is_active = 0, paused_by_workflow = 1
        WHERE id = ? AND is_active = 1
          AND workflow_id IN (SELECT id FROM workflows WHERE status = 'paused')
        "#,
    )
    .bind(trigger_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn workflow_from_row(row: &SqliteRow) -> Result<Workflow> {
    let definition: String = row.try_get("definition")?;
    let tags: String = row.try_get("tags")?;

    Ok(Workflow {
        id: row.try_get("id")?,
        artist_id: row.try_get("artist_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        category: row.try_get::<String, _>("category")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        definition: serde_json::from_str(&definition).context("Corrupt workflow definition")?,
        tags: serde_json::from_str(&tags)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn trigger_from_row(row: &SqliteRow) -> Result<WorkflowTrigger> {
    let config: String = row.try_get("config")?;

    Ok(WorkflowTrigger {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        trigger_type: row.try_get::<String, _>("type")?.parse::<TriggerType>()?,
        config: serde_json::from_str(&config)?,
        is_active: row.try_get("is_active")?,
        last_fired_at: row.try_get::<Option<DateTime<Utc>>, _>("last_fired_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn execution_from_row(row: &SqliteRow) -> Result<WorkflowExecution> {
    let trigger_data: String = row.try_get("trigger_data")?;

    Ok(WorkflowExecution {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        status: row.try_get::<String, _>("status")?.parse()?,
        triggered_by: row.try_get::<String, _>("triggered_by")?.parse()?,
        trigger_data: serde_json::from_str(&trigger_data)?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error: row.try_get("error")?,
    })
}
