// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::engine::ProcessContext;
use crate::app::errors::{AppError, AppResult};
use crate::app::runtime::Runtime;
use crate::app::services::shell::is_unsafe_cleanup_path;
use crate::app::tasks::{Task, compute_cluster, payload_mismatch};
use crate::app::types::{TaskModel, TaskPayload, TaskType};

/// Removes the per-process scratch directory.
pub struct EnvCleanupTask;

#[async_trait]
impl Task for EnvCleanupTask {
    async fn execute(
        &self,
        rt: &Runtime,
        ctx: &mut ProcessContext,
        task: &TaskModel,
    ) -> AppResult<()> {
        let TaskPayload::EnvCleanup { location } = &task.payload else {
            return Err(payload_mismatch(task, TaskType::EnvCleanup));
        };
        if !ctx.process.cleanup_scratch {
            tracing::debug!(process_id = %ctx.process_id(), "scratch cleanup disabled");
            return Ok(());
        }
        if is_unsafe_cleanup_path(location) {
            return Err(AppError::configuration(format!(
                "refusing to remove {location} on {}",
                ctx.compute_host()
            )));
        }
        let cluster = compute_cluster(rt, ctx).await?;
        cluster.remove_path(location).await?;
        tracing::info!(process_id = %ctx.process_id(), location = %location, "scratch removed");
        Ok(())
    }
}
