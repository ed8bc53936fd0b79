// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::app::errors::{AppError, AppResult};
use crate::app::monitor::{JobReport, Monitors};
use crate::app::ports::{
    CatalogPort, ClockPort, CoordinationPort, LaunchQueuePort, NotificationSourcePort,
    RegistryPort, RemoteClusterFactory, StatusPublisherPort,
};
use crate::app::types::{ErrorRecord, ErrorTarget};

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Root of the per-process local working directories.
    pub local_data_location: PathBuf,
    pub monitor_poll_interval: Duration,
    /// Base delay between job-by-name lookups after a submission.
    pub verification_delay: Duration,
    pub max_workers: usize,
    pub queue_poll_interval: Duration,
}

/// Shared services every worker drives a process with.
pub struct Runtime {
    pub registry: Arc<dyn RegistryPort>,
    pub catalog: Arc<dyn CatalogPort>,
    pub coordination: Arc<dyn CoordinationPort>,
    pub queue: Arc<dyn LaunchQueuePort>,
    pub notifications: Arc<dyn NotificationSourcePort>,
    pub clusters: Arc<dyn RemoteClusterFactory>,
    pub status: Arc<dyn StatusPublisherPort>,
    pub clock: Arc<dyn ClockPort>,
    pub monitors: Monitors,
    pub settings: RuntimeSettings,
}

impl Runtime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn RegistryPort>,
        catalog: Arc<dyn CatalogPort>,
        coordination: Arc<dyn CoordinationPort>,
        queue: Arc<dyn LaunchQueuePort>,
        notifications: Arc<dyn NotificationSourcePort>,
        clusters: Arc<dyn RemoteClusterFactory>,
        status: Arc<dyn StatusPublisherPort>,
        clock: Arc<dyn ClockPort>,
        settings: RuntimeSettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<JobReport>) {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let monitors = Monitors::new(registry.clone(), notifications.clone(), reports_tx);
        let runtime = Arc::new(Self {
            registry,
            catalog,
            coordination,
            queue,
            notifications,
            clusters,
            status,
            clock,
            monitors,
            settings,
        });
        (runtime, reports_rx)
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now_utc()
    }

    /// Appends one error record per target.
    pub async fn record_error(&self, targets: &[ErrorTarget], err: &AppError) -> AppResult<()> {
        let record = ErrorRecord {
            actual_message: err.to_string(),
            user_friendly_message: err.user_message(),
            created_at: self.now(),
        };
        for target in targets {
            tracing::debug!(target = ?target, code = err.code(), "recording error");
            self.registry.add_error(target, &record).await?;
        }
        Ok(())
    }
}
