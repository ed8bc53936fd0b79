// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::JobState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNotification {
    pub id: i64,
    pub job_id: String,
    pub state: JobState,
}

/// Scheduler-originated job state reports (mail parsers, push endpoints).
#[async_trait]
pub trait NotificationSourcePort: Send + Sync {
    async fn push(&self, job_id: &str, state: JobState) -> AppResult<()>;
    async fn pending(&self) -> AppResult<Vec<JobNotification>>;
    async fn consume(&self, id: i64) -> AppResult<()>;
}
