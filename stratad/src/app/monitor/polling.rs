// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use super::{JobKey, JobMonitor, JobReport, TrackedJob};
use crate::app::types::{JobState, ServerInfo};

/// Bulk polls a job may be missing from before it is looked up directly.
const UNSEEN_POLL_LIMIT: u32 = 5;

struct Entry {
    job: TrackedJob,
    /// The scheduler listed the job at least once.
    seen: bool,
    /// Consecutive bulk polls that did not list a never-seen job.
    unseen_polls: u32,
}

/// Polls scheduler bulk status per (host, login user) on a fixed interval.
pub struct PollingMonitor {
    jobs: Mutex<HashMap<JobKey, Entry>>,
    reports: mpsc::UnboundedSender<JobReport>,
}

impl PollingMonitor {
    pub fn new(reports: mpsc::UnboundedSender<JobReport>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            reports,
        }
    }

    /// One polling round; returns how many terminal states were reported.
    pub async fn poll_once(&self) -> usize {
        let mut groups: HashMap<(ServerInfo, String), Vec<TrackedJob>> = HashMap::new();
        {
            let jobs = self.jobs.lock().await;
            for entry in jobs.values() {
                groups
                    .entry((
                        entry.job.cluster.server_info().clone(),
                        entry.job.login_user.clone(),
                    ))
                    .or_default()
                    .push(entry.job.clone());
            }
        }

        let mut reported = 0;
        for ((server, user), group) in groups {
            let Some(cluster) = group.first().map(|job| Arc::clone(&job.cluster)) else {
                continue;
            };
            let ids: Vec<String> = group.iter().map(|job| job.job_id.clone()).collect();
            let states = match cluster.statuses(&user, &ids).await {
                Ok(states) => states,
                Err(err) => {
                    tracing::warn!(host = %server.host, user = %user, error = %err, "job status poll failed");
                    continue;
                }
            };
            let mut overdue = Vec::new();
            let mut finished = Vec::new();
            {
                let mut jobs = self.jobs.lock().await;
                for job in &group {
                    let key = job.key();
                    let Some(entry) = jobs.get_mut(&key) else {
                        continue;
                    };
                    let state = states.get(&job.job_id).copied().unwrap_or(JobState::Unknown);
                    match state {
                        state if state.is_terminal() => finished.push((key, state)),
                        // finished jobs drop out of the scheduler listing
                        JobState::Unknown if entry.seen => finished.push((key, JobState::Complete)),
                        JobState::Unknown => {
                            entry.unseen_polls += 1;
                            if entry.unseen_polls >= UNSEEN_POLL_LIMIT {
                                entry.unseen_polls = 0;
                                overdue.push(entry.job.clone());
                            }
                        }
                        _ => {
                            entry.seen = true;
                            entry.unseen_polls = 0;
                        }
                    }
                }
            }
            for job in overdue {
                if let Some(state) = self.resolve_unseen(&job).await {
                    finished.push((job.key(), state));
                }
            }
            for (key, state) in finished {
                reported += self.finish(&key, state).await;
            }
        }
        reported
    }

    /// Decides the fate of a job the bulk listing never showed: a stdout file
    /// in its directory proves it ran; otherwise the scheduler is asked about
    /// it directly.
    async fn resolve_unseen(&self, job: &TrackedJob) -> Option<JobState> {
        let (dir, name) = match job.stdout_path.rsplit_once('/') {
            Some(("", name)) => ("/", name),
            Some(split) => split,
            None => (".", job.stdout_path.as_str()),
        };
        match job.cluster.list_directory(dir).await {
            Ok(entries) if entries.iter().any(|entry| entry == name) => {
                tracing::info!(job_id = %job.job_id, stdout = %job.stdout_path, "unlisted job left output behind");
                return Some(JobState::Complete);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(job_id = %job.job_id, dir, error = %err, "job directory not listable");
            }
        }
        match job.cluster.status(&job.job_id).await {
            Ok(state) if state.is_terminal() => Some(state),
            Ok(JobState::Unknown) => {
                tracing::warn!(job_id = %job.job_id, process_id = %job.process_id, "scheduler never listed job; treating it as finished");
                Some(JobState::Complete)
            }
            Ok(state) => {
                if let Some(entry) = self.jobs.lock().await.get_mut(&job.key()) {
                    entry.seen = true;
                }
                tracing::debug!(job_id = %job.job_id, state = %state, "job found by direct lookup");
                None
            }
            Err(err) => {
                tracing::warn!(job_id = %job.job_id, error = %err, "direct job status lookup failed");
                None
            }
        }
    }

    async fn finish(&self, key: &JobKey, state: JobState) -> usize {
        let Some(entry) = self.jobs.lock().await.remove(key) else {
            return 0;
        };
        tracing::info!(job_id = %key.job_id, process_id = %key.process_id, state = %state, "job reached terminal state");
        if self.reports.send(entry.job.report(state)).is_err() {
            tracing::warn!(job_id = %key.job_id, "job report channel closed");
        }
        1
    }

    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.poll_once().await;
            }
        })
    }
}

#[async_trait]
impl JobMonitor for PollingMonitor {
    async fn track(&self, job: TrackedJob) -> bool {
        let mut jobs = self.jobs.lock().await;
        let key = job.key();
        if jobs.contains_key(&key) {
            return false;
        }
        tracing::debug!(job_id = %job.job_id, process_id = %job.process_id, "polling job status");
        jobs.insert(
            key,
            Entry {
                job,
                seen: false,
                unseen_polls: 0,
            },
        );
        true
    }

    async fn untrack(&self, key: &JobKey) -> bool {
        self.jobs.lock().await.remove(key).is_some()
    }

    async fn is_tracking(&self, key: &JobKey) -> bool {
        self.jobs.lock().await.contains_key(key)
    }
}
