// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::{StatusEvent, StatusPublisherPort};

/// Publishes status changes as structured tracing events under `stratad::status`.
#[derive(Clone, Default)]
pub struct TracingStatusPublisher;

impl TracingStatusPublisher {
    pub fn new() -> Self {
        Self
    }
}

impl StatusPublisherPort for TracingStatusPublisher {
    fn publish(&self, event: StatusEvent) {
        match event {
            StatusEvent::Process {
                process_id,
                experiment_id,
                gateway_id,
                state,
                reason,
            } => tracing::info!(
                target: "stratad::status",
                event = "process",
                process_id = %process_id,
                experiment_id = %experiment_id,
                gateway_id = %gateway_id,
                state = state.as_str(),
                reason = reason.as_deref(),
            ),
            StatusEvent::Task {
                task_id,
                process_id,
                state,
                reason,
            } => tracing::info!(
                target: "stratad::status",
                event = "task",
                task_id = %task_id,
                process_id = %process_id,
                state = state.as_str(),
                reason = reason.as_deref(),
            ),
            StatusEvent::Job {
                job_id,
                process_id,
                state,
            } => tracing::info!(
                target: "stratad::status",
                event = "job",
                job_id = %job_id,
                process_id = %process_id,
                state = state.as_str(),
            ),
        }
    }
}
