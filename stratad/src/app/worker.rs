// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! One worker owns one process for one dispatch pass: it classifies what
//! woke it up, drives the engine, settles cancellation and acknowledges the
//! launch message exactly once when the process is done.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::app::engine::{Engine, ProcessContext};
use crate::app::errors::{AppError, AppResult};
use crate::app::monitor::{JobKey, JobReport};
use crate::app::ports::coordination::paths;
use crate::app::ports::{Delivery, LaunchKind, LaunchQueuePort};
use crate::app::runtime::Runtime;
use crate::app::tasks::job_submission::cancel_job;
use crate::app::types::ProcessState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Launch,
    Cancel,
    JobReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    NewLaunch,
    /// Redelivered launch for a process this instance is already running.
    LiveContinuation,
    Resume,
    CancelRequest,
    JobTerminal,
    AlreadyTerminal,
}

pub fn classify(source: TriggerSource, state: Option<ProcessState>, live: bool) -> Trigger {
    if state.is_some_and(ProcessState::is_terminal) {
        return Trigger::AlreadyTerminal;
    }
    match source {
        TriggerSource::JobReport => Trigger::JobTerminal,
        TriggerSource::Cancel => Trigger::CancelRequest,
        TriggerSource::Launch if live => Trigger::LiveContinuation,
        TriggerSource::Launch => match state {
            None => Trigger::NewLaunch,
            Some(state) if state.is_launchable() => Trigger::NewLaunch,
            Some(ProcessState::Cancelling) => Trigger::CancelRequest,
            Some(_) => Trigger::Resume,
        },
    }
}

/// Sends the acknowledgment for one launch message at most once.
#[derive(Debug)]
pub struct AckGuard {
    tag: Option<i64>,
    sent: bool,
}

impl AckGuard {
    pub fn new(tag: Option<i64>) -> Self {
        Self { tag, sent: false }
    }

    /// `true` when this call sent the acknowledgment.
    pub async fn ack(&mut self, queue: &dyn LaunchQueuePort) -> AppResult<bool> {
        if self.sent {
            return Ok(false);
        }
        let Some(tag) = self.tag else {
            return Ok(false);
        };
        queue.ack(tag).await?;
        self.sent = true;
        tracing::debug!(delivery_tag = tag, "launch acknowledged");
        Ok(true)
    }
}

/// Processes currently driven by this instance, plus a per-process lock that
/// keeps two workers off the same process.
#[derive(Default)]
pub struct LiveProcessTable {
    live: Mutex<HashMap<String, i64>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LiveProcessTable {
    pub fn is_live(&self, process_id: &str) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(process_id)
    }

    pub fn delivery_tag(&self, process_id: &str) -> Option<i64> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(process_id)
            .copied()
    }

    fn insert(&self, process_id: &str, tag: i64) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(process_id.to_string(), tag);
    }

    fn remove(&self, process_id: &str) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(process_id);
    }

    async fn lock(&self, process_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(process_id.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drops the lock entry once no worker holds or waits on it.
    fn prune(&self, process_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(process_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(process_id);
        }
    }
}

pub struct Worker {
    engine: Arc<Engine>,
    live: Arc<LiveProcessTable>,
}

impl Worker {
    pub fn new(engine: Arc<Engine>, live: Arc<LiveProcessTable>) -> Self {
        Self { engine, live }
    }

    fn rt(&self) -> &Runtime {
        self.engine.runtime()
    }

    async fn stored_tag(&self, experiment_id: &str, process_id: &str) -> AppResult<Option<i64>> {
        Ok(self
            .rt()
            .coordination
            .get(&paths::delivery_tag(experiment_id, process_id))
            .await?
            .and_then(|tag| tag.trim().parse().ok()))
    }

    #[tracing::instrument(
        skip(self, delivery),
        fields(process_id = %delivery.message.process_id, delivery_tag = delivery.delivery_tag)
    )]
    pub async fn handle_delivery(&self, delivery: Delivery) -> AppResult<()> {
        let rt = self.rt();
        let message = &delivery.message;
        let process_id = message.process_id.as_str();
        let state = match rt.registry.latest_process_status(process_id).await {
            Ok(status) => status.map(|status| status.state),
            Err(err) => {
                let mut ack = AckGuard::new(Some(delivery.delivery_tag));
                return self.abandon(process_id, &mut ack, err).await;
            }
        };
        let source = match message.kind {
            LaunchKind::Launch => TriggerSource::Launch,
            LaunchKind::Cancel => TriggerSource::Cancel,
        };
        let trigger = classify(source, state, self.live.is_live(process_id));
        tracing::info!(?trigger, redelivered = delivery.redelivered, "dispatching");

        match trigger {
            Trigger::LiveContinuation => {
                self.live.insert(process_id, delivery.delivery_tag);
                rt.coordination
                    .set(
                        &paths::delivery_tag(&message.experiment_id, process_id),
                        &delivery.delivery_tag.to_string(),
                    )
                    .await
            }
            Trigger::AlreadyTerminal => {
                AckGuard::new(Some(delivery.delivery_tag))
                    .ack(rt.queue.as_ref())
                    .await?;
                Ok(())
            }
            Trigger::CancelRequest if message.kind == LaunchKind::Cancel => {
                self.handle_cancel(delivery).await
            }
            _ => self.run_launch(delivery, trigger).await,
        }
    }

    async fn handle_cancel(&self, delivery: Delivery) -> AppResult<()> {
        let rt = self.rt();
        let message = &delivery.message;
        let mut cancel_ack = AckGuard::new(Some(delivery.delivery_tag));
        if let Err(err) = rt
            .coordination
            .set(
                &paths::cancel_marker(&message.experiment_id, &message.process_id),
                "1",
            )
            .await
        {
            return self.abandon(&message.process_id, &mut cancel_ack, err).await;
        }
        cancel_ack.ack(rt.queue.as_ref()).await?;
        if self.live.is_live(&message.process_id) {
            tracing::info!("process is running here; cancel applies at the next task boundary");
            return Ok(());
        }

        let guard = self.live.lock(&message.process_id).await;
        let result = async {
            let state = match rt.registry.latest_process_status(&message.process_id).await {
                Ok(status) => status.map(|status| status.state),
                Err(err) => {
                    return self
                        .abandon_stored(&message.experiment_id, &message.process_id, err)
                        .await;
                }
            };
            if state.is_some_and(ProcessState::is_terminal) {
                return Ok(());
            }
            let mut ack = match self
                .stored_tag(&message.experiment_id, &message.process_id)
                .await
            {
                Ok(tag) => AckGuard::new(tag),
                Err(err) => {
                    return self
                        .abandon(&message.process_id, &mut AckGuard::new(None), err)
                        .await;
                }
            };
            let mut ctx = match self
                .engine
                .populate_context(&message.process_id, &message.gateway_id, &message.token_id)
                .await
            {
                Ok(ctx) => ctx,
                Err(err) => {
                    ack.ack(rt.queue.as_ref()).await?;
                    return Err(err);
                }
            };
            ctx.cancel_requested = true;
            self.settle(&mut ctx, Ok(()), &mut ack).await
        }
        .await;
        drop(guard);
        self.live.prune(&message.process_id);
        result
    }

    async fn run_launch(&self, delivery: Delivery, trigger: Trigger) -> AppResult<()> {
        let rt = self.rt();
        let message = delivery.message;
        let guard = self.live.lock(&message.process_id).await;
        self.live.insert(&message.process_id, delivery.delivery_tag);

        let result = async {
            let mut ack = AckGuard::new(Some(delivery.delivery_tag));
            if let Err(err) = rt
                .coordination
                .set(
                    &paths::delivery_tag(&message.experiment_id, &message.process_id),
                    &delivery.delivery_tag.to_string(),
                )
                .await
            {
                return self.abandon(&message.process_id, &mut ack, err).await;
            }
            let mut ctx = match self
                .engine
                .populate_context(&message.process_id, &message.gateway_id, &message.token_id)
                .await
            {
                Ok(ctx) => ctx,
                Err(err) => {
                    tracing::error!(error = %err, "process could not be loaded");
                    ack.ack(rt.queue.as_ref()).await?;
                    return Ok(());
                }
            };
            if ctx.state.is_terminal() {
                ack.ack(rt.queue.as_ref()).await?;
                return Ok(());
            }
            let outcome = match trigger {
                Trigger::NewLaunch if ctx.cancel_requested => Ok(()),
                Trigger::NewLaunch => self.start(&mut ctx).await,
                Trigger::CancelRequest => {
                    ctx.cancel_requested = true;
                    Ok(())
                }
                _ => self.engine.recover(&mut ctx).await,
            };
            self.settle(&mut ctx, outcome, &mut ack).await
        }
        .await;

        self.live.remove(&message.process_id);
        drop(guard);
        self.live.prune(&message.process_id);
        result
    }

    /// Marks a process FAILED when it cannot even be loaded or registered for
    /// this run, then releases its launch message.
    async fn abandon(
        &self,
        process_id: &str,
        ack: &mut AckGuard,
        err: AppError,
    ) -> AppResult<()> {
        tracing::error!(error = %err, "process could not be driven");
        self.engine.fail_by_id(process_id, &err).await;
        ack.ack(self.rt().queue.as_ref()).await?;
        Ok(())
    }

    /// [`Worker::abandon`] for a process whose launch tag lives in the
    /// coordination store.
    async fn abandon_stored(
        &self,
        experiment_id: &str,
        process_id: &str,
        err: AppError,
    ) -> AppResult<()> {
        let tag = match self.stored_tag(experiment_id, process_id).await {
            Ok(tag) => tag,
            Err(tag_err) => {
                tracing::error!(error = %tag_err, "launch delivery tag unreadable");
                None
            }
        };
        self.abandon(process_id, &mut AckGuard::new(tag), err).await
    }

    async fn start(&self, ctx: &mut ProcessContext) -> AppResult<()> {
        self.engine
            .transition(ctx, ProcessState::Started, None)
            .await?;
        self.engine.execute(ctx).await
    }

    #[tracing::instrument(skip(self, report), fields(process_id = %report.process_id, job_id = %report.job_id))]
    pub async fn handle_report(&self, report: JobReport) -> AppResult<()> {
        let rt = self.rt();
        let guard = self.live.lock(&report.process_id).await;
        let result = async {
            let state = match rt.registry.latest_process_status(&report.process_id).await {
                Ok(status) => status.map(|status| status.state),
                Err(err) => {
                    return self
                        .abandon_stored(&report.experiment_id, &report.process_id, err)
                        .await;
                }
            };
            if classify(TriggerSource::JobReport, state, false) == Trigger::AlreadyTerminal {
                rt.monitors
                    .untrack(&JobKey::new(report.process_id.as_str(), report.job_id.as_str()))
                    .await;
                return Ok(());
            }
            let mut ack = match self
                .stored_tag(&report.experiment_id, &report.process_id)
                .await
            {
                Ok(tag) => AckGuard::new(tag),
                Err(err) => {
                    return self
                        .abandon(&report.process_id, &mut AckGuard::new(None), err)
                        .await;
                }
            };
            let mut ctx = match self
                .engine
                .populate_context(&report.process_id, &report.gateway_id, &report.token_id)
                .await
            {
                Ok(ctx) => ctx,
                Err(err) => {
                    ack.ack(rt.queue.as_ref()).await?;
                    return Err(err);
                }
            };
            let outcome = self.engine.complete_monitoring(&mut ctx, report.state).await;
            self.settle(&mut ctx, outcome, &mut ack).await
        }
        .await;
        drop(guard);
        self.live.prune(&report.process_id);
        result
    }

    /// Applies a pending cancel, fails the process on error and acknowledges
    /// once the process is terminal. A process waiting on its job stays unacked.
    async fn settle(
        &self,
        ctx: &mut ProcessContext,
        outcome: AppResult<()>,
        ack: &mut AckGuard,
    ) -> AppResult<()> {
        let rt = self.rt();
        let mut outcome = outcome;
        if outcome.is_ok()
            && !ctx.state.is_terminal()
            && (ctx.cancel_requested || ctx.interrupted)
        {
            outcome = self.cancel(ctx).await;
        }
        if let Err(err) = outcome {
            tracing::error!(error = %err, state = %ctx.state, "process failed");
            if let Err(fail_err) = self.engine.fail(ctx, &err).await {
                tracing::error!(error = %fail_err, "could not mark process failed");
            }
            ack.ack(rt.queue.as_ref()).await?;
            return Ok(());
        }

        if ctx.state.is_terminal() {
            ack.ack(rt.queue.as_ref()).await?;
            if ctx.state == ProcessState::Completed {
                rt.coordination
                    .delete_tree(&paths::process(ctx.experiment_id(), ctx.process_id()))
                    .await?;
            }
            tracing::info!(state = %ctx.state, "process retired");
        } else {
            tracing::info!(state = %ctx.state, "process waiting for its job");
        }
        Ok(())
    }

    /// Cancels a running job and waits for the cancel to return before the
    /// process is marked CANCELED.
    async fn cancel(&self, ctx: &mut ProcessContext) -> AppResult<()> {
        tracing::info!(state = %ctx.state, "cancelling process");
        if ctx.is_cancellable() {
            self.engine.cancel(ctx).await?;
        } else if ctx.state == ProcessState::Cancelling {
            cancel_job(self.rt(), ctx).await?;
            if let Some(job_id) = ctx.job_id() {
                self.rt()
                    .monitors
                    .untrack(&JobKey::new(ctx.process_id(), job_id))
                    .await;
            }
        } else {
            self.engine
                .transition(ctx, ProcessState::Cancelling, Some("cancel requested".into()))
                .await?;
        }
        self.engine.finish_cancel(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::app::ports::{
        CoordinationPort, LaunchMessage, LaunchQueuePort, RegistryPort,
    };
    use crate::adapters::db::SqliteStoreAdapter;
    use crate::adapters::time::SystemClock;
    use crate::app::testing::{self, Harness};
    use crate::app::types::{
        DataType, InputDataObject, JobState, ProcessStatus, TaskState, TaskStatus, TaskType,
    };

    #[derive(Default)]
    struct CountingQueue {
        acks: AtomicU32,
    }

    #[async_trait]
    impl LaunchQueuePort for CountingQueue {
        async fn publish(&self, _message: &LaunchMessage) -> AppResult<i64> {
            Ok(1)
        }

        async fn next_delivery(&self) -> AppResult<Option<Delivery>> {
            Ok(None)
        }

        async fn ack(&self, _delivery_tag: i64) -> AppResult<()> {
            self.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn requeue_unacked(&self) -> AppResult<u64> {
            Ok(0)
        }
    }

    fn worker(h: &Harness) -> (Worker, Arc<LiveProcessTable>) {
        let live = Arc::new(LiveProcessTable::default());
        let engine = Arc::new(Engine::new(h.runtime.clone()));
        (Worker::new(engine, live.clone()), live)
    }

    async fn deliver(h: &Harness, kind: LaunchKind, process_id: &str) -> Delivery {
        h.store
            .publish(&LaunchMessage {
                kind,
                process_id: process_id.into(),
                experiment_id: format!("EXP_{process_id}"),
                gateway_id: "gw".into(),
                token_id: "tok".into(),
            })
            .await
            .expect("publish");
        h.store
            .next_delivery()
            .await
            .expect("next")
            .expect("delivery")
    }

    async fn state(h: &Harness, process_id: &str) -> ProcessState {
        h.store
            .latest_process_status(process_id)
            .await
            .expect("status")
            .expect("present")
            .state
    }

    /// Delivered-but-unacked messages left in the queue.
    async fn unacked(h: &Harness) -> u64 {
        h.store.requeue_unacked().await.expect("requeue")
    }

    #[test]
    fn triggers_follow_state_and_liveness() {
        use ProcessState::*;
        let launch = TriggerSource::Launch;
        assert_eq!(classify(launch, None, false), Trigger::NewLaunch);
        assert_eq!(classify(launch, Some(Started), false), Trigger::NewLaunch);
        assert_eq!(classify(launch, Some(Executing), false), Trigger::Resume);
        assert_eq!(classify(launch, Some(Executing), true), Trigger::LiveContinuation);
        assert_eq!(classify(launch, Some(Cancelling), false), Trigger::CancelRequest);
        assert_eq!(classify(launch, Some(Completed), true), Trigger::AlreadyTerminal);
        assert_eq!(
            classify(TriggerSource::Cancel, Some(Monitoring), false),
            Trigger::CancelRequest
        );
        assert_eq!(
            classify(TriggerSource::JobReport, Some(Monitoring), false),
            Trigger::JobTerminal
        );
        assert_eq!(
            classify(TriggerSource::JobReport, Some(Canceled), false),
            Trigger::AlreadyTerminal
        );
    }

    #[tokio::test]
    async fn acknowledgment_is_sent_at_most_once() {
        let queue = CountingQueue::default();
        let mut guard = AckGuard::new(Some(7));
        assert!(guard.ack(&queue).await.expect("first"));
        assert!(!guard.ack(&queue).await.expect("second"));
        assert_eq!(queue.acks.load(Ordering::SeqCst), 1);

        let mut untagged = AckGuard::new(None);
        assert!(!untagged.ack(&queue).await.expect("no tag"));
        assert_eq!(queue.acks.load(Ordering::SeqCst), 1);
    }

    /// Coordination store whose delivery-tag writes fail.
    struct TagWritesFail(Arc<SqliteStoreAdapter>);

    #[async_trait]
    impl CoordinationPort for TagWritesFail {
        async fn set(&self, path: &str, data: &str) -> AppResult<()> {
            if path.ends_with("/delivery-tag") {
                return Err(AppError::internal("coordination store unavailable"));
            }
            self.0.set(path, data).await
        }

        async fn get(&self, path: &str) -> AppResult<Option<String>> {
            self.0.get(path).await
        }

        async fn delete_tree(&self, path: &str) -> AppResult<()> {
            self.0.delete_tree(path).await
        }
    }

    #[tokio::test]
    async fn coordination_failure_before_running_fails_and_acks_the_launch() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        testing::seed_process(&h.store, &testing::process("P1")).await;
        let (runtime, _reports) = Runtime::new(
            h.store.clone(),
            h.store.clone(),
            Arc::new(TagWritesFail(h.store.clone())),
            h.store.clone(),
            h.store.clone(),
            h.clusters.clone(),
            h.publisher.clone(),
            Arc::new(SystemClock::new()),
            testing::settings(h.local_dir.path().to_path_buf()),
        );
        let worker = Worker::new(
            Arc::new(Engine::new(runtime)),
            Arc::new(LiveProcessTable::default()),
        );

        let delivery = deliver(&h, LaunchKind::Launch, "P1").await;
        worker.handle_delivery(delivery).await.expect("handled");

        assert_eq!(state(&h, "P1").await, ProcessState::Failed);
        assert_eq!(unacked(&h).await, 0, "failed launch is acknowledged");
        assert!(h.compute().calls().is_empty(), "nothing ran on the cluster");
    }

    #[tokio::test]
    async fn new_launch_runs_until_the_job_is_monitored() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        testing::seed_process(&h.store, &testing::process("P1")).await;
        let (worker, live) = worker(&h);

        let delivery = deliver(&h, LaunchKind::Launch, "P1").await;
        worker.handle_delivery(delivery).await.expect("handled");

        assert_eq!(state(&h, "P1").await, ProcessState::Monitoring);
        assert!(!live.is_live("P1"));
        assert_eq!(unacked(&h).await, 1, "launch stays unacked while monitoring");
    }

    #[tokio::test]
    async fn restart_after_crash_resumes_at_submission() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        testing::seed_process(&h.store, &testing::process("P1")).await;
        let engine = Engine::new(h.runtime.clone());
        let mut ctx = engine.populate_context("P1", "gw", "tok").await.expect("ctx");
        // first worker: planned, set up the workspace, died while submitting
        let tasks = engine.task_order(&mut ctx).await.expect("plan");
        for (task, task_state) in tasks.iter().zip([TaskState::Completed, TaskState::Executing]) {
            h.store
                .add_task_status(
                    &task.task_id,
                    &TaskStatus {
                        state: task_state,
                        reason: None,
                        time_of_change: h.runtime.now(),
                    },
                )
                .await
                .expect("task status");
        }
        assert_eq!(tasks[1].task_type(), crate::app::types::TaskType::JobSubmission);
        h.store
            .add_process_status(
                "P1",
                &ProcessStatus {
                    state: ProcessState::Executing,
                    reason: None,
                    time_of_change: h.runtime.now(),
                },
            )
            .await
            .expect("status");

        let (worker, _live) = worker(&h);
        let delivery = deliver(&h, LaunchKind::Launch, "P1").await;
        worker.handle_delivery(delivery).await.expect("handled");

        let compute = h.compute();
        assert!(compute.calls_starting_with("mkdir:").is_empty());
        assert_eq!(compute.calls_starting_with("submit:").len(), 1);
        assert_eq!(state(&h, "P1").await, ProcessState::Monitoring);
    }

    #[tokio::test]
    async fn restart_with_completed_staging_submits_exactly_once() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        let input = h.local_dir.path().join("in.dat");
        std::fs::write(&input, b"payload").expect("input");
        let mut process = testing::process("P1");
        process.inputs.push(InputDataObject {
            name: "data".into(),
            value: Some(format!("file://{}", input.display())),
            data_type: DataType::Uri,
            ..Default::default()
        });
        testing::seed_process(&h.store, &process).await;
        let engine = Engine::new(h.runtime.clone());
        let mut ctx = engine.populate_context("P1", "gw", "tok").await.expect("ctx");
        // first worker: set up and staged, then died before submitting
        let tasks = engine.task_order(&mut ctx).await.expect("plan");
        let types: Vec<TaskType> = tasks.iter().take(4).map(|task| task.task_type()).collect();
        assert_eq!(
            types,
            vec![
                TaskType::EnvSetup,
                TaskType::DataStaging,
                TaskType::JobSubmission,
                TaskType::Monitoring,
            ]
        );
        for (task, task_state) in tasks
            .iter()
            .zip([TaskState::Completed, TaskState::Completed, TaskState::Created])
        {
            h.store
                .add_task_status(
                    &task.task_id,
                    &TaskStatus {
                        state: task_state,
                        reason: None,
                        time_of_change: h.runtime.now(),
                    },
                )
                .await
                .expect("task status");
        }
        h.store
            .add_process_status(
                "P1",
                &ProcessStatus {
                    state: ProcessState::Executing,
                    reason: None,
                    time_of_change: h.runtime.now(),
                },
            )
            .await
            .expect("status");

        let (worker, _live) = worker(&h);
        let delivery = deliver(&h, LaunchKind::Launch, "P1").await;
        worker.handle_delivery(delivery).await.expect("handled");

        let compute = h.compute();
        assert!(compute.calls_starting_with("mkdir:").is_empty());
        assert!(compute.calls_starting_with("copy_to:").is_empty());
        assert_eq!(compute.calls_starting_with("submit:").len(), 1);
        assert_eq!(state(&h, "P1").await, ProcessState::Monitoring);
    }

    #[tokio::test]
    async fn cancel_before_start_never_touches_the_cluster() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        testing::seed_process(&h.store, &testing::process("P1")).await;
        h.store
            .set(&paths::cancel_marker("EXP_P1", "P1"), "1")
            .await
            .expect("marker");
        let (worker, _live) = worker(&h);

        let delivery = deliver(&h, LaunchKind::Launch, "P1").await;
        worker.handle_delivery(delivery).await.expect("handled");

        assert_eq!(state(&h, "P1").await, ProcessState::Canceled);
        assert_eq!(
            h.publisher.process_states("P1"),
            vec![ProcessState::Cancelling, ProcessState::Canceled]
        );
        assert!(h.compute().calls().is_empty());
        assert_eq!(unacked(&h).await, 0);
    }

    #[tokio::test]
    async fn cancel_while_running_waits_for_the_job_cancel() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        testing::seed_process(&h.store, &testing::process("P1")).await;
        let (worker, _live) = worker(&h);
        let launch = deliver(&h, LaunchKind::Launch, "P1").await;
        worker.handle_delivery(launch).await.expect("launched");
        assert_eq!(state(&h, "P1").await, ProcessState::Monitoring);

        let gate = Arc::new(Notify::new());
        *h.compute().cancel_gate.lock().expect("gate lock") = Some(gate.clone());
        let cancel = deliver(&h, LaunchKind::Cancel, "P1").await;
        let worker = Arc::new(worker);
        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.handle_delivery(cancel).await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while h.compute().calls_starting_with("cancel:").is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("cancel issued");
        assert_eq!(state(&h, "P1").await, ProcessState::Cancelling);

        gate.notify_one();
        handle.await.expect("join").expect("handled");
        assert_eq!(state(&h, "P1").await, ProcessState::Canceled);
        let job = h.store.latest_job_status("1001").await.expect("job").expect("present");
        assert_eq!(job.state, JobState::Canceled);
        assert_eq!(unacked(&h).await, 0);
    }

    #[tokio::test]
    async fn failures_mark_the_process_failed_and_still_acknowledge() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        testing::seed_process(&h.store, &testing::process("P1")).await;
        h.compute().push_submission(Err(crate::app::errors::AppError::submission(
            "submission failed (exit code 1); stdout: ; stderr: qsub: Unknown queue",
        )));
        let (worker, _live) = worker(&h);

        let delivery = deliver(&h, LaunchKind::Launch, "P1").await;
        worker.handle_delivery(delivery).await.expect("handled");

        assert_eq!(state(&h, "P1").await, ProcessState::Failed);
        assert_eq!(unacked(&h).await, 0);
        let errors = h
            .store
            .list_errors(&crate::app::types::ErrorTarget::Process("P1".into()))
            .await
            .expect("errors");
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn redelivery_for_a_live_process_only_updates_the_tag() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        testing::seed_process(&h.store, &testing::process("P1")).await;
        let (worker, live) = worker(&h);
        live.insert("P1", 1);

        let delivery = deliver(&h, LaunchKind::Launch, "P1").await;
        let tag = delivery.delivery_tag;
        worker.handle_delivery(delivery).await.expect("handled");

        assert_eq!(live.delivery_tag("P1"), Some(tag));
        assert_eq!(
            h.store
                .get(&paths::delivery_tag("EXP_P1", "P1"))
                .await
                .expect("get"),
            Some(tag.to_string())
        );
        assert!(h.compute().calls().is_empty());
        assert_eq!(state(&h, "P1").await, ProcessState::Created);
    }

    #[tokio::test]
    async fn terminal_report_completes_and_retires_the_process() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        testing::seed_process(&h.store, &testing::process("P1")).await;
        let (worker, _live) = worker(&h);
        let delivery = deliver(&h, LaunchKind::Launch, "P1").await;
        worker.handle_delivery(delivery).await.expect("launched");

        worker
            .handle_report(JobReport {
                job_id: "1001".into(),
                process_id: "P1".into(),
                experiment_id: "EXP_P1".into(),
                gateway_id: "gw".into(),
                token_id: "tok".into(),
                state: JobState::Complete,
            })
            .await
            .expect("report");

        assert_eq!(state(&h, "P1").await, ProcessState::Completed);
        assert_eq!(unacked(&h).await, 0);
        assert_eq!(
            h.store
                .get(&paths::delivery_tag("EXP_P1", "P1"))
                .await
                .expect("get"),
            None
        );
    }
}
