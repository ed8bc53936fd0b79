// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;

/// Hierarchical key/value nodes shared by every worker instance.
#[async_trait]
pub trait CoordinationPort: Send + Sync {
    async fn set(&self, path: &str, data: &str) -> AppResult<()>;
    async fn get(&self, path: &str) -> AppResult<Option<String>>;
    async fn exists(&self, path: &str) -> AppResult<bool> {
        Ok(self.get(path).await?.is_some())
    }
    /// Removes `path` and every node below it.
    async fn delete_tree(&self, path: &str) -> AppResult<()>;
}

pub mod paths {
    pub fn process(experiment_id: &str, process_id: &str) -> String {
        format!("/experiments/{experiment_id}/{process_id}")
    }

    pub fn cancel_marker(experiment_id: &str, process_id: &str) -> String {
        format!("{}/cancel", process(experiment_id, process_id))
    }

    pub fn delivery_tag(experiment_id: &str, process_id: &str) -> String {
        format!("{}/delivery-tag", process(experiment_id, process_id))
    }

    /// Checkpoint: the task a worker last started for this process.
    pub fn current_task(experiment_id: &str, process_id: &str) -> String {
        format!("{}/current-task", process(experiment_id, process_id))
    }

    pub fn task(experiment_id: &str, process_id: &str, task_id: &str) -> String {
        format!("{}/tasks/{task_id}", process(experiment_id, process_id))
    }
}

pub const INVOKING: &str = "INVOKING";
pub const COMPLETED: &str = "COMPLETED";
