// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::engine::ProcessContext;
use crate::app::errors::{AppError, AppResult};
use crate::app::monitor::TrackedJob;
use crate::app::runtime::Runtime;
use crate::app::tasks::{Task, compute_cluster, payload_mismatch};
use crate::app::types::{TaskModel, TaskPayload, TaskType};

/// Hands the submitted job to the monitor for the process's monitor mode.
/// Finishing this task does not mean the job finished.
pub struct MonitoringTask;

#[async_trait]
impl Task for MonitoringTask {
    async fn execute(
        &self,
        rt: &Runtime,
        ctx: &mut ProcessContext,
        task: &TaskModel,
    ) -> AppResult<()> {
        let TaskPayload::Monitoring { mode } = &task.payload else {
            return Err(payload_mismatch(task, TaskType::Monitoring));
        };
        let job_id = ctx.job_id().map(str::to_string).ok_or_else(|| {
            AppError::invalid_state(format!(
                "process {} has no submitted job to monitor",
                ctx.process_id()
            ))
        })?;
        let monitor = rt.monitors.for_mode(*mode)?;
        let tracked = monitor
            .track(TrackedJob {
                job_id: job_id.clone(),
                process_id: ctx.process_id().to_string(),
                experiment_id: ctx.experiment_id().to_string(),
                gateway_id: ctx.gateway_id().to_string(),
                token_id: ctx.token_id.clone(),
                login_user: ctx.compute.login_user.clone(),
                stdout_path: ctx.stdout_path.clone(),
                cluster: compute_cluster(rt, ctx).await?,
            })
            .await;
        if tracked {
            tracing::info!(job_id = %job_id, mode = %mode, "monitoring job");
        } else {
            tracing::debug!(job_id = %job_id, "job already monitored");
        }
        Ok(())
    }
}
