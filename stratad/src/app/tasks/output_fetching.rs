// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use async_trait::async_trait;

use crate::app::engine::ProcessContext;
use crate::app::errors::{AppError, AppResult};
use crate::app::runtime::Runtime;
use crate::app::services::shell::{file_name, join_remote};
use crate::app::tasks::{Task, compute_transfer_cluster, payload_mismatch};
use crate::app::types::{DataType, TaskModel, TaskPayload, TaskType};

/// Copies streaming outputs into the local working directory on a background
/// task until the job reaches a terminal state. Never persisted.
pub struct OutputFetchingTask;

fn streamed_files(ctx: &ProcessContext, names: &[String]) -> Vec<(String, PathBuf)> {
    ctx.process
        .outputs
        .iter()
        .filter(|output| names.contains(&output.name))
        .map(|output| {
            let remote = match output.data_type {
                DataType::Stdout => ctx.stdout_path.clone(),
                DataType::Stderr => ctx.stderr_path.clone(),
                _ => {
                    let value = output
                        .value
                        .as_deref()
                        .map(str::trim)
                        .filter(|v| !v.is_empty())
                        .unwrap_or(&output.name);
                    if value.starts_with('/') {
                        value.to_string()
                    } else {
                        join_remote(&ctx.output_dir, value)
                    }
                }
            };
            let local = ctx.local_working_dir.join(file_name(&remote));
            (remote, local)
        })
        .collect()
}

#[async_trait]
impl Task for OutputFetchingTask {
    async fn execute(
        &self,
        rt: &Runtime,
        ctx: &mut ProcessContext,
        task: &TaskModel,
    ) -> AppResult<()> {
        let TaskPayload::OutputFetching { outputs } = &task.payload else {
            return Err(payload_mismatch(task, TaskType::OutputFetching));
        };
        let Some(job_id) = ctx.job_id().map(str::to_string) else {
            return Ok(());
        };
        let files = streamed_files(ctx, outputs);
        if files.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&ctx.local_working_dir)
            .await
            .map_err(|err| {
                AppError::task(format!(
                    "create {} failed: {err}",
                    ctx.local_working_dir.display()
                ))
            })?;

        let cluster = compute_transfer_cluster(rt, ctx).await?;
        let registry = rt.registry.clone();
        let interval = rt.settings.monitor_poll_interval;
        tracing::info!(job_id = %job_id, files = files.len(), "fetching streaming outputs");
        tokio::spawn(async move {
            loop {
                let finished = match registry.latest_job_status(&job_id).await {
                    Ok(status) => status.is_some_and(|s| s.state.is_terminal()),
                    Err(err) => {
                        tracing::warn!(job_id = %job_id, error = %err, "job status unavailable; stopping output fetch");
                        true
                    }
                };
                for (remote, local) in &files {
                    if let Err(err) = cluster.copy_from(remote, local).await {
                        tracing::debug!(remote = %remote, error = %err, "streaming output not fetched");
                    }
                }
                if finished {
                    tracing::debug!(job_id = %job_id, "output fetch finished");
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::app::engine::Engine;
    use crate::app::ports::RegistryPort;
    use crate::app::testing;
    use crate::app::types::{JobModel, JobState, JobStatus, OutputDataObject};

    #[tokio::test]
    async fn copies_streaming_outputs_until_the_job_finishes() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        let mut process = testing::process("P1");
        process.outputs.push(OutputDataObject {
            name: "log".into(),
            value: Some("md.log".into()),
            data_type: DataType::Uri,
            output_streaming: true,
            ..Default::default()
        });
        testing::seed_process(&h.store, &process).await;
        let engine = Engine::new(h.runtime.clone());
        let mut ctx = engine.populate_context("P1", "gw", "tok").await.expect("ctx");
        ctx.job = Some(JobModel {
            job_id: "1001".into(),
            ..Default::default()
        });
        h.store
            .add_job_status(
                "1001",
                &JobStatus {
                    state: JobState::Complete,
                    reason: None,
                    time_of_change: h.runtime.now(),
                },
            )
            .await
            .expect("status");
        h.compute().put_file("/scratch/alice/P1/md.log", b"step 1\n");

        let task = TaskModel {
            task_id: "TASK_fetch".into(),
            parent_process_id: "P1".into(),
            payload: TaskPayload::OutputFetching {
                outputs: vec!["log".into()],
            },
            creation_time: time::OffsetDateTime::now_utc(),
        };
        OutputFetchingTask
            .execute(&h.runtime, &mut ctx, &task)
            .await
            .expect("started");

        let local = ctx.local_working_dir.join("md.log");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !local.is_file() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("fetched");
        assert_eq!(std::fs::read(&local).expect("read"), b"step 1\n");
    }
}
