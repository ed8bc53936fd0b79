// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Process engine: rehydrates a process, walks its flat task order and
//! checkpoints progress so another worker can resume it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::app::catalog::{GatewayResourceProfile, UserResourceProfile};
use crate::app::errors::{AppError, AppResult};
use crate::app::monitor::JobKey;
use crate::app::ports::StatusEvent;
use crate::app::ports::coordination::{COMPLETED, INVOKING, paths};
use crate::app::runtime::Runtime;
use crate::app::services::ids::new_id;
use crate::app::services::managers::JobManager;
use crate::app::services::shell::join_remote;
use crate::app::tasks::{self, TaskRegistry};
use crate::app::types::{
    DataMovementProtocol, DataType, ErrorTarget, JobState, JobStatus, JobSubmissionProtocol,
    ProcessModel, ProcessState, ProcessStatus, TaskModel, TaskPayload, TaskState, TaskStatus,
    TaskType,
};

pub mod context;
pub mod plan;
pub mod preferences;
pub mod state;

pub use context::{ProcessContext, StorageTarget};

use context::DEFAULT_SSH_PORT;
use preferences::{ComputeLayers, resolve_storage};

pub struct Engine {
    rt: Arc<Runtime>,
    tasks: TaskRegistry,
}

fn app_file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect();
    if stem.is_empty() { "job".to_string() } else { stem }
}

impl Engine {
    pub fn new(rt: Arc<Runtime>) -> Self {
        Self::with_tasks(rt, TaskRegistry::standard())
    }

    pub fn with_tasks(rt: Arc<Runtime>, tasks: TaskRegistry) -> Self {
        Self { rt, tasks }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.rt
    }

    // ---------- context ----------

    /// Rehydrates a process. Catalog or cluster construction failures are
    /// recorded against the process and experiment and mark it FAILED.
    #[tracing::instrument(skip(self, token_id), fields(process_id = %process_id))]
    pub async fn populate_context(
        &self,
        process_id: &str,
        gateway_id: &str,
        token_id: &str,
    ) -> AppResult<ProcessContext> {
        let process = self
            .rt
            .registry
            .get_process(process_id)
            .await?
            .ok_or_else(|| AppError::catalog(format!("process {process_id} not found")))?;
        if process.gateway_id != gateway_id {
            tracing::warn!(
                expected = %process.gateway_id,
                got = gateway_id,
                "launch gateway does not match the process record"
            );
        }
        match self.build_context(process.clone(), token_id).await {
            Ok(ctx) => Ok(ctx),
            Err(err) => {
                self.fail_unloaded(&process, &err).await;
                Err(err)
            }
        }
    }

    async fn build_context(&self, process: ProcessModel, token_id: &str) -> AppResult<ProcessContext> {
        let registry = &self.rt.registry;
        let catalog = &self.rt.catalog;
        let process_id = process.process_id.clone();
        let state = registry
            .latest_process_status(&process_id)
            .await?
            .map(|status| status.state)
            .unwrap_or(ProcessState::Created);

        let compute_resource = catalog
            .compute_resource(&process.compute_resource_id)
            .await?
            .ok_or_else(|| {
                AppError::catalog(format!(
                    "compute resource {} not found",
                    process.compute_resource_id
                ))
            })?;
        let deployment = catalog
            .application_deployment(&process.application_deployment_id)
            .await?
            .ok_or_else(|| {
                AppError::catalog(format!(
                    "application deployment {} not found",
                    process.application_deployment_id
                ))
            })?;
        let interface = catalog
            .application_interface(&process.application_interface_id)
            .await?
            .ok_or_else(|| {
                AppError::catalog(format!(
                    "application interface {} not found",
                    process.application_interface_id
                ))
            })?;
        let gateway = catalog.gateway_profile(&process.gateway_id).await?;
        let group = match process.group_resource_profile_id.as_deref() {
            Some(id) => catalog.group_profile(id).await?,
            None => None,
        };
        let user = if process.use_user_compute_preference {
            catalog
                .user_profile(&process.user_name, &process.gateway_id)
                .await?
        } else {
            None
        };

        let compute = ComputeLayers::build(
            &compute_resource.compute_resource_id,
            user.as_ref(),
            group.as_ref(),
            gateway.as_ref(),
        )
        .resolve(
            &compute_resource.compute_resource_id,
            &process.scheduling,
            token_id,
        )?;
        let submission = compute_resource
            .preferred_submission(compute.submission_protocol)
            .or_else(|| compute_resource.preferred_submission(None))
            .cloned()
            .ok_or_else(|| {
                AppError::catalog(format!(
                    "compute resource {} has no job submission interface",
                    compute_resource.compute_resource_id
                ))
            })?;
        let data_movement = compute
            .data_movement_protocol
            .or_else(|| {
                compute_resource
                    .preferred_data_movement(None)
                    .map(|iface| iface.protocol)
            })
            .unwrap_or(if submission.protocol == JobSubmissionProtocol::Local {
                DataMovementProtocol::Local
            } else {
                DataMovementProtocol::Scp
            });
        let storage = self
            .storage_target(&process, user.as_ref(), gateway.as_ref(), token_id)
            .await?;

        let working_dir = join_remote(&compute.scratch_location, &process_id);
        let stem = app_file_stem(&interface.application_name);
        let stream_path = |data_type: DataType, suffix: &str| {
            process
                .outputs
                .iter()
                .find(|output| output.data_type == data_type)
                .and_then(|output| output.value.as_deref())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(|value| {
                    if value.starts_with('/') {
                        value.to_string()
                    } else {
                        join_remote(&working_dir, value)
                    }
                })
                .unwrap_or_else(|| join_remote(&working_dir, &format!("{stem}.{suffix}")))
        };
        let stdout_path = stream_path(DataType::Stdout, "stdout");
        let stderr_path = stream_path(DataType::Stderr, "stderr");
        let local_working_dir = self.rt.settings.local_data_location.join(&process_id);

        let job = registry.job_for_process(&process_id).await?;
        let coordination = &self.rt.coordination;
        let cancel_requested = coordination
            .exists(&paths::cancel_marker(&process.experiment_id, &process_id))
            .await?;
        let current_task_id = coordination
            .get(&paths::current_task(&process.experiment_id, &process_id))
            .await?;

        let ctx = ProcessContext {
            job_manager: JobManager::from_resource(&submission.resource_job_manager),
            process,
            token_id: token_id.to_string(),
            state,
            compute_resource,
            deployment,
            interface,
            compute,
            submission,
            data_movement,
            storage,
            input_dir: working_dir.clone(),
            output_dir: working_dir.clone(),
            working_dir,
            stdout_path,
            stderr_path,
            local_working_dir,
            job,
            current_task_id,
            interrupted: false,
            complete: false,
            cancel_requested,
            recovery_with_cancel: false,
            failure_recorded: false,
        };
        self.rt.clusters.cluster(&ctx.compute_spec()).await?;
        self.rt.clusters.cluster(&ctx.transfer_spec()).await?;
        if let Some(spec) = ctx.storage_spec() {
            self.rt.clusters.cluster(&spec).await?;
        }
        Ok(ctx)
    }

    async fn storage_target(
        &self,
        process: &ProcessModel,
        user: Option<&UserResourceProfile>,
        gateway: Option<&GatewayResourceProfile>,
        token_id: &str,
    ) -> AppResult<Option<StorageTarget>> {
        let storage_id = process.storage_resource_id.clone().or_else(|| {
            gateway
                .and_then(|profile| profile.storage_preferences.first())
                .map(|pref| pref.storage_resource_id.clone())
        });
        let Some(storage_id) = storage_id else {
            return Ok(None);
        };
        let resource = self
            .rt
            .catalog
            .storage_resource(&storage_id)
            .await?
            .ok_or_else(|| AppError::catalog(format!("storage resource {storage_id} not found")))?;
        let resolved = resolve_storage(&storage_id, user, gateway, token_id)?;
        let iface = resource
            .data_movement_interfaces
            .iter()
            .min_by_key(|iface| iface.priority);
        Ok(Some(StorageTarget {
            protocol: iface
                .map(|iface| iface.protocol)
                .unwrap_or(DataMovementProtocol::Scp),
            port: iface
                .and_then(|iface| iface.ssh_port)
                .unwrap_or(DEFAULT_SSH_PORT),
            resource,
            resolved,
        }))
    }

    /// Best-effort FAILED for a process no context could be built for.
    pub async fn fail_by_id(&self, process_id: &str, err: &AppError) {
        match self.rt.registry.get_process(process_id).await {
            Ok(Some(process)) => self.fail_unloaded(&process, err).await,
            Ok(None) => tracing::warn!(process_id, "no process record to mark failed"),
            Err(read_err) => {
                tracing::error!(process_id, error = %read_err, "could not load process to mark it failed")
            }
        }
    }

    async fn fail_unloaded(&self, process: &ProcessModel, err: &AppError) {
        let targets = [
            ErrorTarget::Process(process.process_id.clone()),
            ErrorTarget::Experiment(process.experiment_id.clone()),
        ];
        if let Err(record_err) = self.rt.record_error(&targets, err).await {
            tracing::error!(error = %record_err, "failed to record process error");
        }
        let current = match self.rt.registry.latest_process_status(&process.process_id).await {
            Ok(status) => status.map(|s| s.state),
            Err(read_err) => {
                tracing::error!(error = %read_err, "failed to read process status");
                return;
            }
        };
        if current.is_some_and(ProcessState::is_terminal) {
            return;
        }
        if let Err(state_err) = self
            .persist_state(process, ProcessState::Failed, Some(err.user_message()))
            .await
        {
            tracing::error!(error = %state_err, "failed to mark process failed");
        }
    }

    // ---------- state ----------

    async fn persist_state(
        &self,
        process: &ProcessModel,
        next: ProcessState,
        reason: Option<String>,
    ) -> AppResult<()> {
        let registry = &self.rt.registry;
        registry
            .add_process_status(
                &process.process_id,
                &ProcessStatus {
                    state: next,
                    reason: reason.clone(),
                    time_of_change: self.rt.now(),
                },
            )
            .await?;
        if let Some(experiment_state) = state::experiment_state_for(next) {
            let current = registry
                .latest_experiment_state(&process.experiment_id)
                .await?;
            if current != Some(experiment_state) {
                registry
                    .add_experiment_status(&process.experiment_id, experiment_state, reason.as_deref())
                    .await?;
            }
        }
        tracing::info!(process_id = %process.process_id, state = %next, "process state changed");
        self.rt.status.publish(StatusEvent::Process {
            process_id: process.process_id.clone(),
            experiment_id: process.experiment_id.clone(),
            gateway_id: process.gateway_id.clone(),
            state: next,
            reason,
        });
        Ok(())
    }

    /// Moves the process to `next`, rejecting backward moves and moves out
    /// of terminal states. Re-entering the current state writes nothing.
    pub async fn transition(
        &self,
        ctx: &mut ProcessContext,
        next: ProcessState,
        reason: Option<String>,
    ) -> AppResult<()> {
        if ctx.state == next {
            return Ok(());
        }
        if !ctx.state.can_transition_to(next) {
            return Err(AppError::invalid_state(format!(
                "process {} cannot move from {} to {}",
                ctx.process_id(),
                ctx.state,
                next
            )));
        }
        self.persist_state(&ctx.process, next, reason).await?;
        ctx.state = next;
        Ok(())
    }

    /// Force-transitions to FAILED and records the error against the process
    /// and experiment unless that already happened for this failure.
    pub async fn fail(&self, ctx: &mut ProcessContext, err: &AppError) -> AppResult<()> {
        if ctx.state.is_terminal() {
            tracing::warn!(process_id = %ctx.process_id(), state = %ctx.state, error = %err, "failure after terminal state");
            return Ok(());
        }
        if !ctx.failure_recorded {
            self.rt
                .record_error(
                    &[
                        ErrorTarget::Process(ctx.process_id().to_string()),
                        ErrorTarget::Experiment(ctx.experiment_id().to_string()),
                    ],
                    err,
                )
                .await?;
            ctx.failure_recorded = true;
        }
        self.persist_state(&ctx.process, ProcessState::Failed, Some(err.user_message()))
            .await?;
        ctx.state = ProcessState::Failed;
        Ok(())
    }

    async fn set_task_state(
        &self,
        ctx: &ProcessContext,
        task_id: &str,
        state: TaskState,
        reason: Option<String>,
    ) -> AppResult<()> {
        self.rt
            .registry
            .add_task_status(
                task_id,
                &TaskStatus {
                    state,
                    reason: reason.clone(),
                    time_of_change: self.rt.now(),
                },
            )
            .await?;
        self.rt.status.publish(StatusEvent::Task {
            task_id: task_id.to_string(),
            process_id: ctx.process_id().to_string(),
            state,
            reason,
        });
        Ok(())
    }

    async fn finish_task(&self, ctx: &ProcessContext, task: &TaskModel) -> AppResult<()> {
        self.set_task_state(ctx, &task.task_id, TaskState::Completed, None)
            .await?;
        self.rt
            .coordination
            .set(
                &paths::task(ctx.experiment_id(), ctx.process_id(), &task.task_id),
                COMPLETED,
            )
            .await
    }

    /// Level-triggered: once the cancel marker is seen the flag stays set.
    async fn check_interrupt(&self, ctx: &mut ProcessContext) -> AppResult<bool> {
        if !ctx.interrupted
            && self
                .rt
                .coordination
                .exists(&paths::cancel_marker(ctx.experiment_id(), ctx.process_id()))
                .await?
        {
            tracing::info!(process_id = %ctx.process_id(), "cancel marker observed");
            ctx.interrupted = true;
            ctx.cancel_requested = true;
        }
        Ok(ctx.interrupted)
    }

    async fn complete(&self, ctx: &mut ProcessContext) -> AppResult<()> {
        self.transition(ctx, ProcessState::Completed, None).await?;
        ctx.complete = true;
        ctx.current_task_id = None;
        Ok(())
    }

    // ---------- task order ----------

    /// The persisted task order, planned and stored first if the process has none.
    pub async fn task_order(&self, ctx: &mut ProcessContext) -> AppResult<Vec<TaskModel>> {
        let registry = &self.rt.registry;
        if ctx.process.task_order.is_empty() {
            self.transition(ctx, ProcessState::PreProcessing, None)
                .await?;
            let planned = plan::plan_tasks(ctx, self.rt.now())?;
            for task in &planned {
                registry.add_task(task).await?;
                registry
                    .add_task_status(
                        &task.task_id,
                        &TaskStatus {
                            state: TaskState::Created,
                            reason: None,
                            time_of_change: self.rt.now(),
                        },
                    )
                    .await?;
            }
            ctx.process.task_order = planned.iter().map(|task| task.task_id.clone()).collect();
            registry.upsert_process(&ctx.process).await?;
            tracing::info!(process_id = %ctx.process_id(), tasks = planned.len(), "planned task order");
            return Ok(planned);
        }
        let mut by_id: HashMap<String, TaskModel> = registry
            .list_tasks(ctx.process_id())
            .await?
            .into_iter()
            .map(|task| (task.task_id.clone(), task))
            .collect();
        ctx.process
            .task_order
            .iter()
            .map(|id| {
                by_id.remove(id).ok_or_else(|| {
                    AppError::catalog(format!(
                        "task {id} of process {} is missing",
                        ctx.process.process_id
                    ))
                })
            })
            .collect()
    }

    // ---------- execution ----------

    pub async fn execute(&self, ctx: &mut ProcessContext) -> AppResult<()> {
        let tasks = self.task_order(ctx).await?;
        let Some(first) = tasks.first().map(|task| task.task_id.clone()) else {
            return self.complete(ctx).await;
        };
        self.run_tasks(ctx, tasks, &first, false).await
    }

    pub async fn execute_from(&self, ctx: &mut ProcessContext, start_task_id: &str) -> AppResult<()> {
        let tasks = self.task_order(ctx).await?;
        self.run_tasks(ctx, tasks, start_task_id, false).await
    }

    async fn run_tasks(
        &self,
        ctx: &mut ProcessContext,
        tasks: Vec<TaskModel>,
        start_task_id: &str,
        recover_first: bool,
    ) -> AppResult<()> {
        let start = tasks
            .iter()
            .position(|task| task.task_id == start_task_id)
            .ok_or_else(|| {
                AppError::invalid_argument(format!(
                    "task {start_task_id} is not part of process {}",
                    ctx.process_id()
                ))
            })?;
        for (offset, task) in tasks[start..].iter().enumerate() {
            if self.check_interrupt(ctx).await? {
                tracing::info!(process_id = %ctx.process_id(), task_id = %task.task_id, "stopping before task");
                return Ok(());
            }
            self.run_task(ctx, task, recover_first && offset == 0)
                .await?;
            if self.check_interrupt(ctx).await? {
                return Ok(());
            }
            match task.task_type() {
                TaskType::JobSubmission => self.fetch_streaming_outputs(ctx).await?,
                TaskType::Monitoring => {
                    tracing::info!(process_id = %ctx.process_id(), "waiting for the job to finish");
                    return Ok(());
                }
                _ => {}
            }
        }
        self.complete(ctx).await
    }

    async fn run_task(
        &self,
        ctx: &mut ProcessContext,
        task: &TaskModel,
        recovering: bool,
    ) -> AppResult<()> {
        let coordination = &self.rt.coordination;
        ctx.current_task_id = Some(task.task_id.clone());
        coordination
            .set(
                &paths::current_task(ctx.experiment_id(), ctx.process_id()),
                &task.task_id,
            )
            .await?;
        coordination
            .set(
                &paths::task(ctx.experiment_id(), ctx.process_id(), &task.task_id),
                INVOKING,
            )
            .await?;
        self.transition(ctx, state::state_for_task(task), None)
            .await?;
        self.set_task_state(ctx, &task.task_id, TaskState::Executing, None)
            .await?;

        let handler = self.tasks.get(task.task_type())?;
        tracing::info!(
            process_id = %ctx.process_id(),
            task_id = %task.task_id,
            task_type = %task.task_type(),
            recovering,
            "running task"
        );
        let result = if recovering {
            handler.recover(&self.rt, ctx, task).await
        } else {
            handler.execute(&self.rt, ctx, task).await
        };
        match result {
            // monitoring stays EXECUTING until the job reaches a terminal state
            Ok(()) if task.task_type() == TaskType::Monitoring => Ok(()),
            Ok(()) => self.finish_task(ctx, task).await,
            Err(err) => {
                tracing::warn!(task_id = %task.task_id, error = %err, "task failed");
                if let Err(status_err) = self
                    .set_task_state(ctx, &task.task_id, TaskState::Failed, Some(err.to_string()))
                    .await
                {
                    tracing::error!(error = %status_err, "failed to record task status");
                }
                if !ctx.failure_recorded {
                    if let Err(record_err) = self
                        .rt
                        .record_error(&[ErrorTarget::Task(task.task_id.clone())], &err)
                        .await
                    {
                        tracing::error!(error = %record_err, "failed to record task error");
                    }
                }
                Err(err)
            }
        }
    }

    /// Runs the transient output fetcher when the job is still producing
    /// streaming outputs. It is never part of the persisted order.
    async fn fetch_streaming_outputs(&self, ctx: &mut ProcessContext) -> AppResult<()> {
        let outputs: Vec<String> = ctx
            .process
            .outputs
            .iter()
            .filter(|output| output.output_streaming)
            .map(|output| output.name.clone())
            .collect();
        if outputs.is_empty() {
            return Ok(());
        }
        let Some(job_id) = ctx.job_id() else {
            return Ok(());
        };
        let state = self
            .rt
            .registry
            .latest_job_status(job_id)
            .await?
            .map(|status| status.state)
            .unwrap_or(JobState::Unknown);
        if !state.is_in_flight() {
            return Ok(());
        }
        let task = TaskModel {
            task_id: new_id("TASK"),
            parent_process_id: ctx.process_id().to_string(),
            payload: TaskPayload::OutputFetching { outputs },
            creation_time: self.rt.now(),
        };
        self.tasks
            .get(TaskType::OutputFetching)?
            .execute(&self.rt, ctx, &task)
            .await
    }

    /// Resumes at the first task still CREATED or EXECUTING; earlier tasks are
    /// never re-run and the resumed task goes through its recover entry point.
    #[tracing::instrument(skip(self, ctx), fields(process_id = %ctx.process_id()))]
    pub async fn recover(&self, ctx: &mut ProcessContext) -> AppResult<()> {
        ctx.recovery_with_cancel = ctx.cancel_requested;
        if ctx.process.task_order.is_empty() {
            return self.execute(ctx).await;
        }
        let tasks = self.task_order(ctx).await?;
        if ctx.recovery_with_cancel {
            if let Some(job_id) = ctx.job_id().map(str::to_string) {
                let cluster = self.rt.clusters.cluster(&ctx.compute_spec()).await?;
                tracing::info!(job_id = %job_id, "cancel requested before restart; cancelling job");
                tokio::spawn(async move {
                    match cluster.cancel(&job_id).await {
                        Ok(previous) => tracing::info!(job_id = %job_id, previous = %previous, "job cancelled"),
                        Err(err) => tracing::warn!(job_id = %job_id, error = %err, "job cancel failed"),
                    }
                });
            }
        }
        let mut resume_at = None;
        for task in &tasks {
            let state = self
                .rt
                .registry
                .latest_task_status(&task.task_id)
                .await?
                .map(|status| status.state)
                .unwrap_or(TaskState::Created);
            if matches!(state, TaskState::Created | TaskState::Executing) {
                resume_at = Some(task.task_id.clone());
                break;
            }
        }
        match resume_at {
            Some(task_id) => {
                tracing::info!(task_id = %task_id, "resuming process");
                self.run_tasks(ctx, tasks, &task_id, true).await
            }
            None => self.complete(ctx).await,
        }
    }

    /// Cancels the running job. Valid only while EXECUTING or MONITORING; the
    /// process is CANCELLING when this returns and the caller finishes with
    /// [`Engine::finish_cancel`].
    pub async fn cancel(&self, ctx: &mut ProcessContext) -> AppResult<Option<JobState>> {
        if !ctx.is_cancellable() {
            return Err(AppError::invalid_state(format!(
                "process {} is {} and cannot be cancelled",
                ctx.process_id(),
                ctx.state
            )));
        }
        self.transition(ctx, ProcessState::Cancelling, Some("cancel requested".into()))
            .await?;
        let previous = tasks::job_submission::cancel_job(&self.rt, ctx).await?;
        if let Some(job_id) = ctx.job_id() {
            self.rt
                .monitors
                .untrack(&JobKey::new(ctx.process_id(), job_id))
                .await;
        }
        Ok(previous)
    }

    pub async fn finish_cancel(&self, ctx: &mut ProcessContext) -> AppResult<()> {
        if let Some(task_id) = ctx.current_task_id.clone() {
            let current = self
                .rt
                .registry
                .latest_task_status(&task_id)
                .await?
                .map(|status| status.state);
            if current == Some(TaskState::Executing) {
                self.set_task_state(ctx, &task_id, TaskState::Canceled, None)
                    .await?;
            }
        }
        ctx.interrupted = true;
        self.transition(ctx, ProcessState::Canceled, Some("process cancelled".into()))
            .await
    }

    /// Called when a monitor reports a terminal job state.
    #[tracing::instrument(skip(self, ctx), fields(process_id = %ctx.process_id()))]
    pub async fn complete_monitoring(
        &self,
        ctx: &mut ProcessContext,
        job_state: JobState,
    ) -> AppResult<()> {
        if !job_state.is_terminal() {
            return Err(AppError::invalid_argument(format!(
                "{job_state} is not a terminal job state"
            )));
        }
        if ctx.state.is_terminal() {
            tracing::debug!(state = %ctx.state, "process already finished");
            return Ok(());
        }
        if let Some(job_id) = ctx.job_id().map(str::to_string) {
            let latest = self
                .rt
                .registry
                .latest_job_status(&job_id)
                .await?
                .map(|status| status.state);
            if latest != Some(job_state) {
                self.rt
                    .registry
                    .add_job_status(
                        &job_id,
                        &JobStatus {
                            state: job_state,
                            reason: None,
                            time_of_change: self.rt.now(),
                        },
                    )
                    .await?;
                self.rt.status.publish(StatusEvent::Job {
                    job_id: job_id.clone(),
                    process_id: ctx.process_id().to_string(),
                    state: job_state,
                });
            }
            self.rt
                .monitors
                .untrack(&JobKey::new(ctx.process_id(), job_id.as_str()))
                .await;
        }
        if ctx.state == ProcessState::Cancelling {
            return Ok(());
        }

        let tasks = self.task_order(ctx).await?;
        let monitor_index = tasks
            .iter()
            .position(|task| task.task_type() == TaskType::Monitoring);
        match job_state {
            JobState::Complete => {
                let Some(index) = monitor_index else {
                    return self.complete(ctx).await;
                };
                self.finish_task(ctx, &tasks[index]).await?;
                match tasks.get(index + 1).map(|task| task.task_id.clone()) {
                    Some(next) => self.execute_from(ctx, &next).await,
                    None => self.complete(ctx).await,
                }
            }
            JobState::Canceled => {
                if let Some(index) = monitor_index {
                    self.set_task_state(ctx, &tasks[index].task_id, TaskState::Canceled, None)
                        .await?;
                }
                self.transition(ctx, ProcessState::Canceled, Some("job was cancelled".into()))
                    .await
            }
            _ => {
                let err = AppError::task(format!(
                    "job {} failed on {}",
                    ctx.job_id().unwrap_or("<unknown>"),
                    ctx.compute_host()
                ));
                if let Some(index) = monitor_index {
                    self.set_task_state(
                        ctx,
                        &tasks[index].task_id,
                        TaskState::Failed,
                        Some(err.to_string()),
                    )
                    .await?;
                }
                self.fail(ctx, &err).await
            }
        }
    }
}
