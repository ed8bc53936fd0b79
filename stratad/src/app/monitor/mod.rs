// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Job monitors. Each runs on its own tokio task and reports terminal job
//! states back to the dispatcher through a channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{NotificationSourcePort, RegistryPort, RemoteCluster};
use crate::app::types::{JobState, MonitorMode};

mod notification;
mod polling;

pub use notification::NotificationMonitor;
pub use polling::PollingMonitor;

/// A terminal job state observed by a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: String,
    pub process_id: String,
    pub experiment_id: String,
    pub gateway_id: String,
    pub token_id: String,
    pub state: JobState,
}

/// Scheduler job ids are only unique per host, so tracked jobs are keyed by
/// the owning process as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub process_id: String,
    pub job_id: String,
}

impl JobKey {
    pub fn new(process_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            job_id: job_id.into(),
        }
    }
}

#[derive(Clone)]
pub struct TrackedJob {
    pub job_id: String,
    pub process_id: String,
    pub experiment_id: String,
    pub gateway_id: String,
    pub token_id: String,
    pub login_user: String,
    /// Scheduler stdout file; its presence marks a job that already ran.
    pub stdout_path: String,
    pub cluster: Arc<dyn RemoteCluster>,
}

impl TrackedJob {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.process_id.clone(), self.job_id.clone())
    }

    fn report(&self, state: JobState) -> JobReport {
        JobReport {
            job_id: self.job_id.clone(),
            process_id: self.process_id.clone(),
            experiment_id: self.experiment_id.clone(),
            gateway_id: self.gateway_id.clone(),
            token_id: self.token_id.clone(),
            state,
        }
    }
}

#[async_trait]
pub trait JobMonitor: Send + Sync {
    /// Starts tracking `job`; `false` when it was already tracked.
    async fn track(&self, job: TrackedJob) -> bool;
    /// Stops tracking; `false` when the job was not tracked.
    async fn untrack(&self, key: &JobKey) -> bool;
    async fn is_tracking(&self, key: &JobKey) -> bool;
}

/// Monitor registration table keyed by monitor mode.
pub struct Monitors {
    polling: Arc<PollingMonitor>,
    notification: Arc<NotificationMonitor>,
    by_mode: HashMap<MonitorMode, Arc<dyn JobMonitor>>,
}

impl Monitors {
    pub fn new(
        registry: Arc<dyn RegistryPort>,
        notifications: Arc<dyn NotificationSourcePort>,
        reports: mpsc::UnboundedSender<JobReport>,
    ) -> Self {
        let polling = Arc::new(PollingMonitor::new(reports.clone()));
        let notification = Arc::new(NotificationMonitor::new(notifications, registry, reports));
        let mut by_mode: HashMap<MonitorMode, Arc<dyn JobMonitor>> = HashMap::new();
        by_mode.insert(MonitorMode::JobStatusPolling, polling.clone());
        by_mode.insert(MonitorMode::Notification, notification.clone());
        Self {
            polling,
            notification,
            by_mode,
        }
    }

    pub fn for_mode(&self, mode: MonitorMode) -> AppResult<Arc<dyn JobMonitor>> {
        self.by_mode
            .get(&mode)
            .cloned()
            .ok_or_else(|| AppError::configuration(format!("no monitor registered for {mode}")))
    }

    /// Removes the job from every monitor that tracks it.
    pub async fn untrack(&self, key: &JobKey) -> bool {
        let mut removed = false;
        for monitor in self.by_mode.values() {
            removed |= monitor.untrack(key).await;
        }
        removed
    }

    pub fn spawn(&self, interval: Duration) -> Vec<JoinHandle<()>> {
        vec![
            Arc::clone(&self.polling).spawn(interval),
            Arc::clone(&self.notification).spawn(interval),
        ]
    }
}
