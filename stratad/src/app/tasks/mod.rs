// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Task handlers. Each task type is registered once in a [`TaskRegistry`];
//! the engine looks handlers up by the type stored on the task record.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::engine::ProcessContext;
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::RemoteCluster;
use crate::app::runtime::Runtime;
use crate::app::types::{TaskModel, TaskType};

pub mod data_staging;
pub mod env_cleanup;
pub mod env_setup;
pub mod job_submission;
pub mod monitoring;
pub mod output_fetching;

#[async_trait]
pub trait Task: Send + Sync {
    async fn execute(&self, rt: &Runtime, ctx: &mut ProcessContext, task: &TaskModel)
    -> AppResult<()>;

    /// Entry point used when a restarted worker resumes this task.
    async fn recover(
        &self,
        rt: &Runtime,
        ctx: &mut ProcessContext,
        task: &TaskModel,
    ) -> AppResult<()> {
        self.execute(rt, ctx, task).await
    }
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<TaskType, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn standard() -> Self {
        let mut registry = Self::default();
        registry.register(TaskType::EnvSetup, Arc::new(env_setup::EnvSetupTask));
        registry.register(TaskType::DataStaging, Arc::new(data_staging::DataStagingTask));
        registry.register(
            TaskType::JobSubmission,
            Arc::new(job_submission::JobSubmissionTask),
        );
        registry.register(TaskType::Monitoring, Arc::new(monitoring::MonitoringTask));
        registry.register(
            TaskType::OutputFetching,
            Arc::new(output_fetching::OutputFetchingTask),
        );
        registry.register(TaskType::EnvCleanup, Arc::new(env_cleanup::EnvCleanupTask));
        registry
    }

    pub fn register(&mut self, task_type: TaskType, task: Arc<dyn Task>) {
        self.tasks.insert(task_type, task);
    }

    pub fn get(&self, task_type: TaskType) -> AppResult<Arc<dyn Task>> {
        self.tasks
            .get(&task_type)
            .cloned()
            .ok_or_else(|| AppError::configuration(format!("no handler for {task_type} tasks")))
    }
}

pub(crate) async fn compute_cluster(
    rt: &Runtime,
    ctx: &ProcessContext,
) -> AppResult<Arc<dyn RemoteCluster>> {
    rt.clusters.cluster(&ctx.compute_spec()).await
}

/// File-only handle on the compute host for staging.
pub(crate) async fn compute_transfer_cluster(
    rt: &Runtime,
    ctx: &ProcessContext,
) -> AppResult<Arc<dyn RemoteCluster>> {
    rt.clusters.cluster(&ctx.transfer_spec()).await
}

pub(crate) async fn storage_cluster(
    rt: &Runtime,
    ctx: &ProcessContext,
) -> AppResult<Arc<dyn RemoteCluster>> {
    let spec = ctx.storage_spec().ok_or_else(|| {
        AppError::configuration(format!(
            "process {} has no storage resource",
            ctx.process_id()
        ))
    })?;
    rt.clusters.cluster(&spec).await
}

pub(crate) fn payload_mismatch(task: &TaskModel, expected: TaskType) -> AppError {
    AppError::internal(format!(
        "task {} carries a {} payload, expected {expected}",
        task.task_id,
        task.task_type()
    ))
}
