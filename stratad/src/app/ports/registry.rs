// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{
    ErrorRecord, ErrorTarget, ExperimentState, JobModel, JobStatus, ProcessModel, ProcessStatus,
    TaskModel, TaskStatus,
};

/// Process, task and job records with their status histories.
/// The latest status entry of a record is its current state.
#[async_trait]
pub trait RegistryPort: Send + Sync {
    async fn get_process(&self, process_id: &str) -> AppResult<Option<ProcessModel>>;
    async fn upsert_process(&self, process: &ProcessModel) -> AppResult<()>;
    async fn latest_process_status(&self, process_id: &str) -> AppResult<Option<ProcessStatus>>;
    async fn add_process_status(&self, process_id: &str, status: &ProcessStatus) -> AppResult<()>;

    async fn add_task(&self, task: &TaskModel) -> AppResult<()>;
    async fn list_tasks(&self, process_id: &str) -> AppResult<Vec<TaskModel>>;
    async fn latest_task_status(&self, task_id: &str) -> AppResult<Option<TaskStatus>>;
    async fn add_task_status(&self, task_id: &str, status: &TaskStatus) -> AppResult<()>;

    async fn upsert_job(&self, job: &JobModel) -> AppResult<()>;
    async fn job_for_process(&self, process_id: &str) -> AppResult<Option<JobModel>>;
    async fn job_by_id(&self, job_id: &str) -> AppResult<Option<JobModel>>;
    async fn latest_job_status(&self, job_id: &str) -> AppResult<Option<JobStatus>>;
    async fn add_job_status(&self, job_id: &str, status: &JobStatus) -> AppResult<()>;

    async fn add_experiment_status(
        &self,
        experiment_id: &str,
        state: ExperimentState,
        reason: Option<&str>,
    ) -> AppResult<()>;
    async fn latest_experiment_state(&self, experiment_id: &str)
    -> AppResult<Option<ExperimentState>>;

    async fn add_error(&self, target: &ErrorTarget, error: &ErrorRecord) -> AppResult<()>;
    async fn list_errors(&self, target: &ErrorTarget) -> AppResult<Vec<ErrorRecord>>;
}
