// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};
use std::{path::Path, str::FromStr, time::Duration};
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::app::ports::{Delivery, JobNotification, LaunchMessage};
use crate::app::types::{
    ErrorRecord, ErrorTarget, ExperimentState, JobModel, JobState, JobStatus, ProcessModel,
    ProcessState, ProcessStatus, TaskModel, TaskPayload, TaskState, TaskStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("timestamp error: {0}")]
    Time(String),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
    #[error("empty identifier")]
    EmptyId,
    #[error("task {0} belongs to an unknown process")]
    UnknownProcess(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

const QUEUE_PENDING: &str = "pending";
const QUEUE_DELIVERED: &str = "delivered";
const QUEUE_ACKED: &str = "acked";

/// Async SQLite store backing the registry, catalog, coordination, launch
/// queue and notification inbox.
#[derive(Clone)]
pub struct EngineStore {
    pool: SqlitePool,
}

fn format_time(time: OffsetDateTime) -> Result<String> {
    time.format(&Rfc3339)
        .map_err(|err| StoreError::Time(err.to_string()))
}

fn parse_time(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| StoreError::Time(err.to_string()))
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(StoreError::InvalidValue)
}

fn require_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(StoreError::EmptyId);
    }
    Ok(())
}

fn row_to_task(row: &SqliteRow) -> Result<TaskModel> {
    let payload: String = row.try_get("payload")?;
    let creation_time: String = row.try_get("creation_time")?;
    Ok(TaskModel {
        task_id: row.try_get("task_id")?,
        parent_process_id: row.try_get("process_id")?,
        payload: serde_json::from_str::<TaskPayload>(&payload)?,
        creation_time: parse_time(&creation_time)?,
    })
}

impl EngineStore {
    /// Open (or create) a file-backed SQLite DB.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let url = format!("sqlite://{}", path_ref.to_string_lossy());
        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Open an in-memory store (handy for tests).
    #[allow(dead_code)]
    pub async fn open_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        // Improve concurrency for file DBs.
        let _ = sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await;

        self.ensure_registry_tables().await?;
        self.ensure_catalog_table().await?;
        self.ensure_coordination_table().await?;
        self.ensure_queue_tables().await?;
        Ok(())
    }

    async fn ensure_registry_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processes (
              process_id TEXT PRIMARY KEY,
              experiment_id TEXT NOT NULL,
              gateway_id TEXT NOT NULL,
              body TEXT NOT NULL, -- JSON
              created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
              updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_processes_experiment ON processes(experiment_id);

            CREATE TABLE IF NOT EXISTS process_statuses (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              process_id TEXT NOT NULL REFERENCES processes(process_id) ON DELETE CASCADE,
              state TEXT NOT NULL,
              reason TEXT,
              time_of_change TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_process_statuses_process
              ON process_statuses(process_id, id);

            CREATE TABLE IF NOT EXISTS experiment_statuses (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              experiment_id TEXT NOT NULL,
              state TEXT NOT NULL,
              reason TEXT,
              time_of_change TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_experiment_statuses_experiment
              ON experiment_statuses(experiment_id, id);

            CREATE TABLE IF NOT EXISTS tasks (
              task_id TEXT PRIMARY KEY,
              process_id TEXT NOT NULL REFERENCES processes(process_id) ON DELETE CASCADE,
              task_type TEXT NOT NULL,
              payload TEXT NOT NULL, -- JSON
              creation_time TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_process ON tasks(process_id);

            CREATE TABLE IF NOT EXISTS task_statuses (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
              state TEXT NOT NULL,
              reason TEXT,
              time_of_change TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_task_statuses_task ON task_statuses(task_id, id);

            CREATE TABLE IF NOT EXISTS jobs (
              job_id TEXT PRIMARY KEY,
              task_id TEXT NOT NULL,
              process_id TEXT NOT NULL,
              body TEXT NOT NULL, -- JSON
              created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_process ON jobs(process_id);

            CREATE TABLE IF NOT EXISTS job_statuses (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              job_id TEXT NOT NULL,
              state TEXT NOT NULL,
              reason TEXT,
              time_of_change TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_job_statuses_job ON job_statuses(job_id, id);

            CREATE TABLE IF NOT EXISTS errors (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              target_kind TEXT NOT NULL,
              target_id TEXT NOT NULL,
              actual_message TEXT NOT NULL,
              user_friendly_message TEXT NOT NULL,
              created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_errors_target ON errors(target_kind, target_id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_catalog_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS catalog_documents (
              kind TEXT NOT NULL,
              key TEXT NOT NULL,
              body TEXT NOT NULL, -- JSON
              updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
              PRIMARY KEY(kind, key)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_coordination_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS coordination_nodes (
              path TEXT PRIMARY KEY,
              data TEXT NOT NULL,
              updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ensure_queue_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS launch_queue (
              delivery_tag INTEGER PRIMARY KEY AUTOINCREMENT,
              body TEXT NOT NULL, -- JSON
              status TEXT NOT NULL DEFAULT 'pending',
              delivered_count INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
              acked_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_launch_queue_status ON launch_queue(status, delivery_tag);

            CREATE TABLE IF NOT EXISTS job_notifications (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              job_id TEXT NOT NULL,
              state TEXT NOT NULL,
              consumed INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_job_notifications_pending
              ON job_notifications(consumed, id);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ---------- processes ----------

    pub async fn upsert_process(&self, process: &ProcessModel) -> Result<()> {
        require_id(&process.process_id)?;
        let body = serde_json::to_string(process)?;
        sqlx::query(
            r#"
            INSERT INTO processes(process_id, experiment_id, gateway_id, body)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(process_id) DO UPDATE SET
              experiment_id = excluded.experiment_id,
              gateway_id = excluded.gateway_id,
              body = excluded.body,
              updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
            "#,
        )
        .bind(&process.process_id)
        .bind(&process.experiment_id)
        .bind(&process.gateway_id)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_process(&self, process_id: &str) -> Result<Option<ProcessModel>> {
        let row = sqlx::query("SELECT body FROM processes WHERE process_id = ?")
            .bind(process_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    pub async fn add_process_status(&self, process_id: &str, status: &ProcessStatus) -> Result<()> {
        sqlx::query(
            "INSERT INTO process_statuses(process_id, state, reason, time_of_change) VALUES (?, ?, ?, ?)",
        )
        .bind(process_id)
        .bind(status.state.as_str())
        .bind(status.reason.as_deref())
        .bind(format_time(status.time_of_change)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_process_status(&self, process_id: &str) -> Result<Option<ProcessStatus>> {
        let row = sqlx::query(
            r#"
            SELECT state, reason, time_of_change FROM process_statuses
            WHERE process_id = ? ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(process_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row.try_get("state")?;
        let time: String = row.try_get("time_of_change")?;
        Ok(Some(ProcessStatus {
            state: parse_enum::<ProcessState>(&state)?,
            reason: row.try_get("reason")?,
            time_of_change: parse_time(&time)?,
        }))
    }

    pub async fn add_experiment_status(
        &self,
        experiment_id: &str,
        state: ExperimentState,
        reason: Option<&str>,
    ) -> Result<()> {
        sqlx::query("INSERT INTO experiment_statuses(experiment_id, state, reason) VALUES (?, ?, ?)")
            .bind(experiment_id)
            .bind(state.as_str())
            .bind(reason)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn latest_experiment_state(
        &self,
        experiment_id: &str,
    ) -> Result<Option<ExperimentState>> {
        let row = sqlx::query(
            "SELECT state FROM experiment_statuses WHERE experiment_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(experiment_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let state: String = row.try_get("state")?;
                Ok(Some(parse_enum(&state)?))
            }
            None => Ok(None),
        }
    }

    // ---------- tasks ----------

    pub async fn add_task(&self, task: &TaskModel) -> Result<()> {
        require_id(&task.task_id)?;
        let payload = serde_json::to_string(&task.payload)?;
        let result = sqlx::query(
            r#"
            INSERT INTO tasks(task_id, process_id, task_type, payload, creation_time)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.parent_process_id)
        .bind(task.task_type().as_str())
        .bind(payload)
        .bind(format_time(task.creation_time)?)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(StoreError::UnknownProcess(task.task_id.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn list_tasks(&self, process_id: &str) -> Result<Vec<TaskModel>> {
        let rows = sqlx::query(
            r#"
            SELECT task_id, process_id, payload, creation_time FROM tasks
            WHERE process_id = ? ORDER BY rowid
            "#,
        )
        .bind(process_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_task).collect()
    }

    pub async fn add_task_status(&self, task_id: &str, status: &TaskStatus) -> Result<()> {
        sqlx::query(
            "INSERT INTO task_statuses(task_id, state, reason, time_of_change) VALUES (?, ?, ?, ?)",
        )
        .bind(task_id)
        .bind(status.state.as_str())
        .bind(status.reason.as_deref())
        .bind(format_time(status.time_of_change)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_task_status(&self, task_id: &str) -> Result<Option<TaskStatus>> {
        let row = sqlx::query(
            r#"
            SELECT state, reason, time_of_change FROM task_statuses
            WHERE task_id = ? ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row.try_get("state")?;
        let time: String = row.try_get("time_of_change")?;
        Ok(Some(TaskStatus {
            state: parse_enum::<TaskState>(&state)?,
            reason: row.try_get("reason")?,
            time_of_change: parse_time(&time)?,
        }))
    }

    // ---------- jobs ----------

    pub async fn upsert_job(&self, job: &JobModel) -> Result<()> {
        require_id(&job.job_id)?;
        let body = serde_json::to_string(job)?;
        sqlx::query(
            r#"
            INSERT INTO jobs(job_id, task_id, process_id, body) VALUES (?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
              task_id = excluded.task_id,
              process_id = excluded.process_id,
              body = excluded.body
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.task_id)
        .bind(&job.process_id)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn job_for_process(&self, process_id: &str) -> Result<Option<JobModel>> {
        let row = sqlx::query(
            "SELECT body FROM jobs WHERE process_id = ? ORDER BY rowid DESC LIMIT 1",
        )
        .bind(process_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    pub async fn job_by_id(&self, job_id: &str) -> Result<Option<JobModel>> {
        let row = sqlx::query("SELECT body FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    pub async fn add_job_status(&self, job_id: &str, status: &JobStatus) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_statuses(job_id, state, reason, time_of_change) VALUES (?, ?, ?, ?)",
        )
        .bind(job_id)
        .bind(status.state.as_str())
        .bind(status.reason.as_deref())
        .bind(format_time(status.time_of_change)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_job_status(&self, job_id: &str) -> Result<Option<JobStatus>> {
        let row = sqlx::query(
            r#"
            SELECT state, reason, time_of_change FROM job_statuses
            WHERE job_id = ? ORDER BY id DESC LIMIT 1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row.try_get("state")?;
        let time: String = row.try_get("time_of_change")?;
        Ok(Some(JobStatus {
            state: parse_enum::<JobState>(&state)?,
            reason: row.try_get("reason")?,
            time_of_change: parse_time(&time)?,
        }))
    }

    // ---------- errors ----------

    pub async fn add_error(&self, target: &ErrorTarget, error: &ErrorRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO errors(target_kind, target_id, actual_message, user_friendly_message, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(target.kind())
        .bind(target.id())
        .bind(&error.actual_message)
        .bind(&error.user_friendly_message)
        .bind(format_time(error.created_at)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_errors(&self, target: &ErrorTarget) -> Result<Vec<ErrorRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT actual_message, user_friendly_message, created_at FROM errors
            WHERE target_kind = ? AND target_id = ? ORDER BY id
            "#,
        )
        .bind(target.kind())
        .bind(target.id())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let created_at: String = row.try_get("created_at")?;
                Ok(ErrorRecord {
                    actual_message: row.try_get("actual_message")?,
                    user_friendly_message: row.try_get("user_friendly_message")?,
                    created_at: parse_time(&created_at)?,
                })
            })
            .collect()
    }

    // ---------- catalog ----------

    pub async fn put_document(&self, kind: &str, key: &str, body: &serde_json::Value) -> Result<()> {
        require_id(key)?;
        sqlx::query(
            r#"
            INSERT INTO catalog_documents(kind, key, body) VALUES (?, ?, ?)
            ON CONFLICT(kind, key) DO UPDATE SET
              body = excluded.body,
              updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
            "#,
        )
        .bind(kind)
        .bind(key)
        .bind(serde_json::to_string(body)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, kind: &str, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT body FROM catalog_documents WHERE kind = ? AND key = ?")
            .bind(kind)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.try_get::<String, _>("body")).transpose()?)
    }

    // ---------- coordination ----------

    pub async fn set_node(&self, path: &str, data: &str) -> Result<()> {
        require_id(path)?;
        sqlx::query(
            r#"
            INSERT INTO coordination_nodes(path, data) VALUES (?, ?)
            ON CONFLICT(path) DO UPDATE SET
              data = excluded.data,
              updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
            "#,
        )
        .bind(path)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_node(&self, path: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT data FROM coordination_nodes WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.try_get::<String, _>("data")).transpose()?)
    }

    pub async fn delete_node_tree(&self, path: &str) -> Result<u64> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let result = sqlx::query(
            "DELETE FROM coordination_nodes WHERE path = ? OR substr(path, 1, length(?)) = ?",
        )
        .bind(path)
        .bind(&prefix)
        .bind(&prefix)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ---------- launch queue ----------

    pub async fn publish(&self, message: &LaunchMessage) -> Result<i64> {
        let row = sqlx::query("INSERT INTO launch_queue(body) VALUES (?) RETURNING delivery_tag")
            .bind(serde_json::to_string(message)?)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("delivery_tag")?)
    }

    pub async fn next_delivery(&self) -> Result<Option<Delivery>> {
        let row = sqlx::query(
            r#"
            UPDATE launch_queue
            SET status = ?, delivered_count = delivered_count + 1
            WHERE delivery_tag = (
              SELECT delivery_tag FROM launch_queue
              WHERE status = ? ORDER BY delivery_tag LIMIT 1
            )
            RETURNING delivery_tag, body, delivered_count
            "#,
        )
        .bind(QUEUE_DELIVERED)
        .bind(QUEUE_PENDING)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let body: String = row.try_get("body")?;
        let delivered_count: i64 = row.try_get("delivered_count")?;
        Ok(Some(Delivery {
            delivery_tag: row.try_get("delivery_tag")?,
            message: serde_json::from_str(&body)?,
            redelivered: delivered_count > 1,
        }))
    }

    /// Returns true only for the call that moved the message to acked.
    pub async fn ack(&self, delivery_tag: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE launch_queue
            SET status = ?, acked_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
            WHERE delivery_tag = ? AND status != ?
            "#,
        )
        .bind(QUEUE_ACKED)
        .bind(delivery_tag)
        .bind(QUEUE_ACKED)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn requeue_unacked(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE launch_queue SET status = ? WHERE status = ?")
            .bind(QUEUE_PENDING)
            .bind(QUEUE_DELIVERED)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ---------- job notifications ----------

    pub async fn push_notification(&self, job_id: &str, state: JobState) -> Result<i64> {
        require_id(job_id)?;
        let row = sqlx::query("INSERT INTO job_notifications(job_id, state) VALUES (?, ?) RETURNING id")
            .bind(job_id)
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("id")?)
    }

    pub async fn pending_notifications(&self) -> Result<Vec<JobNotification>> {
        let rows = sqlx::query(
            "SELECT id, job_id, state FROM job_notifications WHERE consumed = 0 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let state: String = row.try_get("state")?;
                Ok(JobNotification {
                    id: row.try_get("id")?,
                    job_id: row.try_get("job_id")?,
                    state: parse_enum(&state)?,
                })
            })
            .collect()
    }

    pub async fn consume_notification(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE job_notifications SET consumed = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::LaunchKind;
    use crate::app::types::{MonitorMode, ResourceScheduling};

    fn sample_process(id: &str) -> ProcessModel {
        ProcessModel {
            process_id: id.to_string(),
            experiment_id: "EXP_1".into(),
            gateway_id: "gw".into(),
            user_name: "alice".into(),
            compute_resource_id: "cr".into(),
            application_interface_id: "iface".into(),
            application_deployment_id: "dep".into(),
            group_resource_profile_id: None,
            storage_resource_id: None,
            experiment_data_dir: None,
            task_order: vec![],
            inputs: vec![],
            outputs: vec![],
            scheduling: ResourceScheduling::default(),
            use_user_compute_preference: false,
            archive: false,
            cleanup_scratch: false,
        }
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    #[tokio::test]
    async fn latest_status_follows_insertion_order() {
        let store = EngineStore::open_memory().await.expect("store");
        store.upsert_process(&sample_process("P1")).await.expect("process");
        let t = now();
        for state in [ProcessState::Started, ProcessState::Executing] {
            store
                .add_process_status(
                    "P1",
                    &ProcessStatus {
                        state,
                        reason: None,
                        time_of_change: t,
                    },
                )
                .await
                .expect("status");
        }
        let latest = store.latest_process_status("P1").await.expect("latest");
        assert_eq!(latest.map(|s| s.state), Some(ProcessState::Executing));
        assert!(store.latest_process_status("P2").await.expect("none").is_none());
    }

    #[tokio::test]
    async fn tasks_list_in_creation_order_and_reject_unknown_process() {
        let store = EngineStore::open_memory().await.expect("store");
        store.upsert_process(&sample_process("P1")).await.expect("process");
        for (id, payload) in [
            ("T2", TaskPayload::EnvSetup { location: "/w".into() }),
            (
                "T1",
                TaskPayload::Monitoring {
                    mode: MonitorMode::JobStatusPolling,
                },
            ),
        ] {
            store
                .add_task(&TaskModel {
                    task_id: id.into(),
                    parent_process_id: "P1".into(),
                    payload,
                    creation_time: now(),
                })
                .await
                .expect("task");
        }
        let ids: Vec<String> = store
            .list_tasks("P1")
            .await
            .expect("tasks")
            .into_iter()
            .map(|t| t.task_id)
            .collect();
        assert_eq!(ids, vec!["T2".to_string(), "T1".to_string()]);

        let err = store
            .add_task(&TaskModel {
                task_id: "T9".into(),
                parent_process_id: "missing".into(),
                payload: TaskPayload::EnvSetup { location: "/w".into() },
                creation_time: now(),
            })
            .await
            .expect_err("fk violation");
        assert!(matches!(err, StoreError::UnknownProcess(_)));
    }

    #[tokio::test]
    async fn queue_redelivers_unacked_messages_and_acks_once() {
        let store = EngineStore::open_memory().await.expect("store");
        let message = LaunchMessage {
            kind: LaunchKind::Launch,
            process_id: "P1".into(),
            experiment_id: "EXP_1".into(),
            gateway_id: "gw".into(),
            token_id: "tok".into(),
        };
        let tag = store.publish(&message).await.expect("publish");
        let first = store.next_delivery().await.expect("next").expect("delivery");
        assert_eq!(first.delivery_tag, tag);
        assert!(!first.redelivered);
        assert!(store.next_delivery().await.expect("empty").is_none());

        assert_eq!(store.requeue_unacked().await.expect("requeue"), 1);
        let second = store.next_delivery().await.expect("next").expect("again");
        assert!(second.redelivered);
        assert_eq!(second.message, message);

        assert!(store.ack(tag).await.expect("ack"));
        assert!(!store.ack(tag).await.expect("second ack"));
        assert_eq!(store.requeue_unacked().await.expect("requeue"), 0);
    }

    #[tokio::test]
    async fn delete_node_tree_keeps_siblings_with_shared_prefix() {
        let store = EngineStore::open_memory().await.expect("store");
        store.set_node("/experiments/E/P_1/cancel", "1").await.expect("set");
        store.set_node("/experiments/E/P_1/tasks/T", "INVOKING").await.expect("set");
        store.set_node("/experiments/E/P_10/cancel", "1").await.expect("set");
        store.delete_node_tree("/experiments/E/P_1").await.expect("delete");
        assert!(store.get_node("/experiments/E/P_1/cancel").await.expect("get").is_none());
        assert!(store.get_node("/experiments/E/P_1/tasks/T").await.expect("get").is_none());
        assert_eq!(
            store.get_node("/experiments/E/P_10/cancel").await.expect("get").as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn notifications_are_consumed_once() {
        let store = EngineStore::open_memory().await.expect("store");
        let id = store.push_notification("42", JobState::Complete).await.expect("push");
        let pending = store.pending_notifications().await.expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].state, JobState::Complete);
        store.consume_notification(id).await.expect("consume");
        assert!(store.pending_notifications().await.expect("pending").is_empty());
    }
}
