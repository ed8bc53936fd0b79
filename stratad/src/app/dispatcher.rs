// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};

use crate::app::engine::Engine;
use crate::app::monitor::JobReport;
use crate::app::runtime::Runtime;
use crate::app::worker::{LiveProcessTable, Worker};

/// Pulls launch deliveries and monitor reports and hands each to a worker,
/// with at most `max_workers` running at once.
pub struct Dispatcher {
    rt: Arc<Runtime>,
    worker: Arc<Worker>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(rt: Arc<Runtime>) -> Self {
        let engine = Arc::new(Engine::new(rt.clone()));
        let worker = Arc::new(Worker::new(engine, Arc::new(LiveProcessTable::default())));
        let permits = Arc::new(Semaphore::new(rt.settings.max_workers.max(1)));
        Self {
            rt,
            worker,
            permits,
        }
    }

    pub async fn run(
        self,
        mut reports: mpsc::UnboundedReceiver<JobReport>,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.rt.settings.queue_poll_interval);
        tracing::info!(max_workers = self.rt.settings.max_workers, "dispatcher started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(report) = reports.recv() => {
                    let Ok(permit) = self.permits.clone().acquire_owned().await else {
                        break;
                    };
                    self.spawn_report(report, permit);
                }
                _ = ticker.tick() => self.drain_queue().await,
            }
        }
        tracing::info!("dispatcher stopped");
    }

    /// Starts a worker for every pending delivery while permits last.
    async fn drain_queue(&self) {
        loop {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                return;
            };
            match self.rt.queue.next_delivery().await {
                Ok(Some(delivery)) => {
                    let worker = self.worker.clone();
                    tokio::spawn(async move {
                        let process_id = delivery.message.process_id.clone();
                        if let Err(err) = worker.handle_delivery(delivery).await {
                            tracing::error!(process_id = %process_id, error = %err, "worker failed");
                        }
                        drop(permit);
                    });
                }
                Ok(None) => return,
                Err(err) => {
                    tracing::warn!(error = %err, "launch queue unavailable");
                    return;
                }
            }
        }
    }

    fn spawn_report(&self, report: JobReport, permit: OwnedSemaphorePermit) {
        let worker = self.worker.clone();
        tokio::spawn(async move {
            let process_id = report.process_id.clone();
            if let Err(err) = worker.handle_report(report).await {
                tracing::error!(process_id = %process_id, error = %err, "job report handling failed");
            }
            drop(permit);
        });
    }
}
