// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;

use crate::app::engine::ProcessContext;
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{RemoteCluster, StatusEvent};
use crate::app::runtime::Runtime;
use crate::app::services::script::{self, JobDescriptor};
use crate::app::services::shell::{file_name, join_remote, sh_escape};
use crate::app::services::uri;
use crate::app::tasks::{Task, compute_cluster, payload_mismatch};
use crate::app::types::{
    DataType, ErrorTarget, JobModel, JobState, JobStatus, TaskModel, TaskPayload, TaskType,
};

const VERIFY_ATTEMPTS: u32 = 3;

/// Renders the batch script, submits it and persists the resulting job.
pub struct JobSubmissionTask;

/// Path an input lands at on the compute host once staged.
fn staged_path(ctx: &ProcessContext, value: &str) -> String {
    match uri::parse(value) {
        Ok(parsed) => join_remote(&ctx.input_dir, file_name(&parsed.path)),
        Err(_) => value.to_string(),
    }
}

fn arguments(ctx: &ProcessContext) -> Vec<String> {
    let mut inputs: Vec<_> = ctx
        .process
        .inputs
        .iter()
        .filter(|input| input.add_to_command_line)
        .collect();
    inputs.sort_by_key(|input| input.order);
    let mut args = Vec::new();
    for input in inputs {
        let Some(value) = input.value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
            continue;
        };
        if let Some(flag) = input.command_line_arg.as_deref().filter(|f| !f.is_empty()) {
            args.push(flag.to_string());
        }
        match input.data_type {
            DataType::Uri => args.push(staged_path(ctx, value)),
            DataType::UriCollection => args.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| staged_path(ctx, v)),
            ),
            _ => args.push(value.to_string()),
        }
    }
    args
}

/// Scheduling values come from the process first, then the compute
/// preference, then the deployment defaults.
pub fn descriptor(ctx: &ProcessContext, job_name: &str) -> JobDescriptor {
    let scheduling = &ctx.process.scheduling;
    let deployment = &ctx.deployment;
    JobDescriptor {
        job_name: job_name.to_string(),
        working_dir: ctx.working_dir.clone(),
        stdout_path: ctx.stdout_path.clone(),
        stderr_path: ctx.stderr_path.clone(),
        queue: scheduling
            .queue_name
            .clone()
            .or_else(|| ctx.compute.batch_queue.clone())
            .or_else(|| deployment.default_queue_name.clone()),
        node_count: scheduling.node_count.or(deployment.default_node_count),
        cpu_count: scheduling.total_cpu_count.or(deployment.default_cpu_count),
        wall_time_minutes: scheduling.wall_time_limit.or(deployment.default_walltime),
        memory_mb: scheduling.total_physical_memory,
        allocation: ctx.compute.allocation.clone(),
        parallelism: deployment.parallelism,
        module_loads: deployment.module_load_cmds.clone(),
        environment: deployment
            .set_environment
            .iter()
            .map(|env| (env.name.clone(), env.value.clone()))
            .collect(),
        pre_job_commands: deployment.pre_job_commands.clone(),
        executable: deployment.executable_path.clone(),
        arguments: arguments(ctx),
        post_job_commands: deployment.post_job_commands.clone(),
    }
}

async fn record_job_state(
    rt: &Runtime,
    ctx: &ProcessContext,
    job_id: &str,
    state: JobState,
    reason: Option<String>,
) -> AppResult<()> {
    rt.registry
        .add_job_status(
            job_id,
            &JobStatus {
                state,
                reason,
                time_of_change: rt.now(),
            },
        )
        .await?;
    rt.status.publish(StatusEvent::Job {
        job_id: job_id.to_string(),
        process_id: ctx.process_id().to_string(),
        state,
    });
    Ok(())
}

/// Looks a job up by name with an increasing delay between attempts.
async fn verify_by_name(
    rt: &Runtime,
    ctx: &ProcessContext,
    cluster: &dyn RemoteCluster,
    job_name: &str,
) -> AppResult<Option<String>> {
    for attempt in 1..=VERIFY_ATTEMPTS {
        tokio::time::sleep(rt.settings.verification_delay * attempt).await;
        if let Some(job_id) = cluster
            .job_id_by_name(job_name, &ctx.compute.login_user)
            .await?
        {
            return Ok(Some(job_id));
        }
        tracing::debug!(job_name, attempt, "job not visible yet");
    }
    Ok(None)
}

async fn report_usage(rt: &Runtime, ctx: &ProcessContext, cluster: &dyn RemoteCluster, job_id: &str) {
    let resource = &ctx.compute_resource;
    if !resource.gateway_usage_reporting {
        return;
    }
    let Some(executable) = resource.gateway_usage_executable.as_deref() else {
        tracing::warn!(resource = %resource.compute_resource_id, "usage reporting enabled without an executable");
        return;
    };
    let gateway = ctx
        .compute
        .usage_reporting_gateway_id
        .as_deref()
        .unwrap_or(ctx.gateway_id());
    let submit_time = rt
        .now()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();
    let mut command = format!(
        "{executable} -gateway_id {} -user {} -submit_time {} -jobid {}",
        sh_escape(gateway),
        sh_escape(&ctx.process.user_name),
        sh_escape(&submit_time),
        sh_escape(job_id)
    );
    if let Some(module) = resource.gateway_usage_module_load_command.as_deref() {
        command = format!("{module} && {command}");
    }
    match cluster.exec(&command).await {
        Ok(true) => tracing::debug!(job_id, "usage reported"),
        Ok(false) => tracing::warn!(job_id, "usage reporting command failed"),
        Err(err) => tracing::warn!(job_id, error = %err, "usage reporting failed"),
    }
}

impl JobSubmissionTask {
    async fn submit(
        &self,
        rt: &Runtime,
        ctx: &mut ProcessContext,
        task: &TaskModel,
        job_name: &str,
    ) -> AppResult<()> {
        let cluster = compute_cluster(rt, ctx).await?;
        let kind = ctx.job_manager.kind();
        let job_script = script::render(kind, &descriptor(ctx, job_name));
        let script_path = join_remote(&ctx.working_dir, script::script_file_name(kind));
        cluster
            .write_file(&script_path, job_script.as_bytes())
            .await?;

        let output = cluster.submit(&script_path, &ctx.working_dir).await?;
        let job_id = match output.job_id.clone() {
            Some(job_id) => job_id,
            None => verify_by_name(rt, ctx, cluster.as_ref(), job_name)
                .await?
                .ok_or_else(|| {
                    AppError::submission(format!(
                        "job {job_name} not found after submission; output: {}",
                        output.output.combined()
                    ))
                })?,
        };

        let job = JobModel {
            job_id: job_id.clone(),
            task_id: task.task_id.clone(),
            process_id: ctx.process_id().to_string(),
            job_name: job_name.to_string(),
            job_description: job_script,
            working_dir: ctx.working_dir.clone(),
            std_out: Some(output.output.stdout.clone()),
            std_err: Some(output.output.stderr.clone()),
            exit_code: Some(output.output.exit_code),
        };
        rt.registry.upsert_job(&job).await?;
        record_job_state(rt, ctx, &job_id, JobState::Submitted, None).await?;
        ctx.job = Some(job);
        tracing::info!(process_id = %ctx.process_id(), job_id = %job_id, host = %ctx.compute_host(), "job submitted");

        match cluster.status(&job_id).await {
            Ok(state) if state != JobState::Unknown && !state.is_terminal() => {
                record_job_state(rt, ctx, &job_id, JobState::Queued, None).await?;
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(job_id = %job_id, error = %err, "status check after submission failed"),
        }
        report_usage(rt, ctx, cluster.as_ref(), &job_id).await;
        Ok(())
    }

    async fn record_failure(&self, rt: &Runtime, ctx: &mut ProcessContext, task: &TaskModel, err: &AppError) {
        let targets = [
            ErrorTarget::Task(task.task_id.clone()),
            ErrorTarget::Process(ctx.process_id().to_string()),
            ErrorTarget::Experiment(ctx.experiment_id().to_string()),
        ];
        match rt.record_error(&targets, err).await {
            Ok(()) => ctx.failure_recorded = true,
            Err(record_err) => tracing::error!(error = %record_err, "failed to record submission error"),
        }
    }
}

#[async_trait]
impl Task for JobSubmissionTask {
    async fn execute(
        &self,
        rt: &Runtime,
        ctx: &mut ProcessContext,
        task: &TaskModel,
    ) -> AppResult<()> {
        let TaskPayload::JobSubmission { job_name } = &task.payload else {
            return Err(payload_mismatch(task, TaskType::JobSubmission));
        };
        let result = self.submit(rt, ctx, task, job_name).await;
        if let Err(err) = &result {
            self.record_failure(rt, ctx, task, err).await;
        }
        result
    }

    /// A persisted job id is never resubmitted; without one the job is looked
    /// up by name before falling back to a fresh submission.
    async fn recover(
        &self,
        rt: &Runtime,
        ctx: &mut ProcessContext,
        task: &TaskModel,
    ) -> AppResult<()> {
        let TaskPayload::JobSubmission { job_name } = &task.payload else {
            return Err(payload_mismatch(task, TaskType::JobSubmission));
        };
        if ctx.job_id().is_none() {
            ctx.job = rt.registry.job_for_process(ctx.process_id()).await?;
        }
        if let Some(job_id) = ctx.job_id() {
            tracing::info!(job_id, "job already submitted; not resubmitting");
            return Ok(());
        }
        let cluster = compute_cluster(rt, ctx).await?;
        let found = cluster
            .job_id_by_name(job_name, &ctx.compute.login_user)
            .await?;
        let Some(job_id) = found else {
            return self.execute(rt, ctx, task).await;
        };
        tracing::info!(job_id = %job_id, job_name, "found job submitted before restart");
        let job = JobModel {
            job_id: job_id.clone(),
            task_id: task.task_id.clone(),
            process_id: ctx.process_id().to_string(),
            job_name: job_name.clone(),
            working_dir: ctx.working_dir.clone(),
            ..Default::default()
        };
        rt.registry.upsert_job(&job).await?;
        record_job_state(rt, ctx, &job_id, JobState::Submitted, None).await?;
        ctx.job = Some(job);
        Ok(())
    }
}

/// Cancels the process's job and returns the status it had before.
pub async fn cancel_job(rt: &Runtime, ctx: &ProcessContext) -> AppResult<Option<JobState>> {
    let Some(job_id) = ctx.job_id().map(str::to_string) else {
        tracing::info!(process_id = %ctx.process_id(), "no job to cancel");
        return Ok(None);
    };
    let cluster: Arc<dyn RemoteCluster> = compute_cluster(rt, ctx).await?;
    let previous = cluster.cancel(&job_id).await?;
    record_job_state(rt, ctx, &job_id, JobState::Canceled, None).await?;
    tracing::info!(job_id = %job_id, previous = %previous, "job cancelled");
    Ok(Some(previous))
}
