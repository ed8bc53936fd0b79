// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use super::{JobKey, JobMonitor, JobReport, TrackedJob};
use crate::app::errors::AppResult;
use crate::app::ports::{NotificationSourcePort, RegistryPort};

/// Passive monitor fed by scheduler notifications instead of polling.
///
/// Notifications for jobs the registry knows but nobody tracks yet stay
/// pending, so a process resumed after a restart still sees them. A
/// notification names only the scheduler job id and applies to every tracked
/// job carrying it.
pub struct NotificationMonitor {
    jobs: Mutex<HashMap<JobKey, TrackedJob>>,
    source: Arc<dyn NotificationSourcePort>,
    registry: Arc<dyn RegistryPort>,
    reports: mpsc::UnboundedSender<JobReport>,
}

impl NotificationMonitor {
    pub fn new(
        source: Arc<dyn NotificationSourcePort>,
        registry: Arc<dyn RegistryPort>,
        reports: mpsc::UnboundedSender<JobReport>,
    ) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            source,
            registry,
            reports,
        }
    }

    pub async fn drain_once(&self) -> AppResult<usize> {
        let mut reported = 0;
        for notification in self.source.pending().await? {
            let matching: Vec<TrackedJob> = self
                .jobs
                .lock()
                .await
                .values()
                .filter(|job| job.job_id == notification.job_id)
                .cloned()
                .collect();
            if matching.is_empty() {
                if self.registry.job_by_id(&notification.job_id).await?.is_none() {
                    tracing::debug!(job_id = %notification.job_id, "dropping notification for unknown job");
                    self.source.consume(notification.id).await?;
                }
                continue;
            }
            for job in matching {
                if notification.state.is_terminal() {
                    self.jobs.lock().await.remove(&job.key());
                    tracing::info!(job_id = %job.job_id, process_id = %job.process_id, state = %notification.state, "job notification");
                    if self.reports.send(job.report(notification.state)).is_err() {
                        tracing::warn!(job_id = %job.job_id, "job report channel closed");
                    }
                    reported += 1;
                } else {
                    tracing::debug!(job_id = %job.job_id, state = %notification.state, "job progress notification");
                }
            }
            self.source.consume(notification.id).await?;
        }
        Ok(reported)
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = self.drain_once().await {
                    tracing::warn!(error = %err, "reading job notifications failed");
                }
            }
        })
    }
}

#[async_trait]
impl JobMonitor for NotificationMonitor {
    async fn track(&self, job: TrackedJob) -> bool {
        let mut jobs = self.jobs.lock().await;
        let key = job.key();
        if jobs.contains_key(&key) {
            return false;
        }
        jobs.insert(key, job);
        true
    }

    async fn untrack(&self, key: &JobKey) -> bool {
        self.jobs.lock().await.remove(key).is_some()
    }

    async fn is_tracking(&self, key: &JobKey) -> bool {
        self.jobs.lock().await.contains_key(key)
    }
}
