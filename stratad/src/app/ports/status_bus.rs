// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::types::{JobState, ProcessState, TaskState};

#[derive(Clone, Debug)]
pub enum StatusEvent {
    Process {
        process_id: String,
        experiment_id: String,
        gateway_id: String,
        state: ProcessState,
        reason: Option<String>,
    },
    Task {
        task_id: String,
        process_id: String,
        state: TaskState,
        reason: Option<String>,
    },
    Job {
        job_id: String,
        process_id: String,
        state: JobState,
    },
}

pub trait StatusPublisherPort: Send + Sync {
    fn publish(&self, event: StatusEvent);
}
