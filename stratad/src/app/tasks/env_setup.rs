// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::engine::ProcessContext;
use crate::app::errors::{AppError, AppResult};
use crate::app::runtime::Runtime;
use crate::app::tasks::{Task, compute_cluster, payload_mismatch};
use crate::app::types::{SecurityProtocol, TaskModel, TaskPayload, TaskType};

/// Creates the remote working, input and output directories and the local
/// working directory outputs are staged into.
pub struct EnvSetupTask;

#[async_trait]
impl Task for EnvSetupTask {
    async fn execute(
        &self,
        rt: &Runtime,
        ctx: &mut ProcessContext,
        task: &TaskModel,
    ) -> AppResult<()> {
        let TaskPayload::EnvSetup { location } = &task.payload else {
            return Err(payload_mismatch(task, TaskType::EnvSetup));
        };
        match ctx.submission.security_protocol {
            SecurityProtocol::SshKeys | SecurityProtocol::Local => {}
            other => {
                return Err(AppError::configuration(format!(
                    "security protocol {other} is not supported on {}",
                    ctx.compute_host()
                )));
            }
        }

        let cluster = compute_cluster(rt, ctx).await?;
        let mut dirs = vec![location.as_str(), ctx.input_dir.as_str(), ctx.output_dir.as_str()];
        dirs.dedup();
        for dir in dirs {
            cluster.make_directory(dir).await?;
        }
        tokio::fs::create_dir_all(&ctx.local_working_dir)
            .await
            .map_err(|err| {
                AppError::task(format!(
                    "create {} failed: {err}",
                    ctx.local_working_dir.display()
                ))
            })?;
        tracing::info!(process_id = %ctx.process_id(), working_dir = %location, "workspace ready");
        Ok(())
    }
}
