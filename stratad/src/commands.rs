// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::adapters::cli::ProcessArgs;
use crate::adapters::cluster::ClusterRegistry;
use crate::adapters::credentials::FileCredentialStore;
use crate::adapters::db::{EngineStore, SqliteStoreAdapter};
use crate::adapters::ssh::{HostKeyPolicy, RetryPolicy, SshSessionProvider, SshSettings};
use crate::adapters::status_bus::TracingStatusPublisher;
use crate::adapters::time::SystemClock;
use crate::app::catalog::CatalogKind;
use crate::app::dispatcher::Dispatcher;
use crate::app::ports::coordination::paths;
use crate::app::ports::{
    CatalogPort, CoordinationPort, LaunchKind, LaunchMessage, LaunchQueuePort,
    NotificationSourcePort, RegistryPort,
};
use crate::app::runtime::{Runtime, RuntimeSettings};
use crate::app::types::{JobState, ProcessModel, ProcessState, ProcessStatus};
use crate::config::{self, Config};

pub async fn open_store(config: &Config) -> Result<SqliteStoreAdapter> {
    config::ensure_parent_dir(&config.database_path)?;
    let store = EngineStore::open(&config.database_path)
        .await
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    Ok(SqliteStoreAdapter::new(store))
}

fn host_key_policy(config: &Config) -> HostKeyPolicy {
    match (&config.known_hosts_path, config.strict_host_key_checking) {
        (Some(path), true) => HostKeyPolicy::Strict(path.clone()),
        (Some(path), false) => HostKeyPolicy::Learn(path.clone()),
        (None, _) => HostKeyPolicy::Disabled,
    }
}

/// Runs the daemon until ctrl-c.
pub async fn serve(config: Config) -> Result<()> {
    std::fs::create_dir_all(&config.local_data_location).with_context(|| {
        format!(
            "failed to create local data location {}",
            config.local_data_location.display()
        )
    })?;
    let store = Arc::new(open_store(&config).await?);
    let requeued = store.requeue_unacked().await?;
    if requeued > 0 {
        tracing::info!(requeued, "unacknowledged launches returned to the queue");
    }

    let credentials = Arc::new(FileCredentialStore::new(config.credential_dir.clone()));
    let ssh = Arc::new(SshSessionProvider::new(
        credentials,
        SshSettings {
            host_key_policy: host_key_policy(&config),
            keepalive_secs: config.ssh_keepalive_secs,
            idle_timeout: config.session_idle(),
            retry: RetryPolicy::new(config.transport_attempts),
        },
    ));
    let sweeper = ssh
        .sessions()
        .spawn_sweeper((config.session_idle() / 2).max(Duration::from_secs(1)));
    let clusters = Arc::new(ClusterRegistry::new(ssh));

    let (runtime, reports) = Runtime::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store,
        clusters,
        Arc::new(TracingStatusPublisher::new()),
        Arc::new(SystemClock::new()),
        RuntimeSettings {
            local_data_location: config.local_data_location.clone(),
            monitor_poll_interval: config.monitor_poll_interval(),
            verification_delay: config.verification_delay(),
            max_workers: config.max_workers,
            queue_poll_interval: config.queue_poll_interval(),
        },
    );
    let monitor_tasks = runtime.monitors.spawn(config.monitor_poll_interval());

    Dispatcher::new(runtime)
        .run(reports, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown requested");
        })
        .await;

    for task in monitor_tasks {
        task.abort();
    }
    sweeper.abort();
    Ok(())
}

fn launch_message(kind: LaunchKind, args: ProcessArgs) -> LaunchMessage {
    LaunchMessage {
        kind,
        process_id: args.process_id,
        experiment_id: args.experiment,
        gateway_id: args.gateway,
        token_id: args.token,
    }
}

pub async fn launch(store: &SqliteStoreAdapter, args: ProcessArgs) -> Result<i64> {
    if store.get_process(&args.process_id).await?.is_none() {
        anyhow::bail!("process {} is not registered", args.process_id);
    }
    let tag = store.publish(&launch_message(LaunchKind::Launch, args)).await?;
    Ok(tag)
}

/// Sets the cancel marker first so a worker already driving the process
/// sees it at the next task boundary.
pub async fn cancel(store: &SqliteStoreAdapter, args: ProcessArgs) -> Result<i64> {
    store
        .set(&paths::cancel_marker(&args.experiment, &args.process_id), "1")
        .await?;
    let tag = store.publish(&launch_message(LaunchKind::Cancel, args)).await?;
    Ok(tag)
}

pub async fn notify(store: &SqliteStoreAdapter, job_id: &str, state: JobState) -> Result<()> {
    store.push(job_id, state).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ImportDocument {
    kind: CatalogKind,
    key: String,
    body: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImportBundle {
    #[serde(default)]
    documents: Vec<ImportDocument>,
    #[serde(default)]
    processes: Vec<ProcessModel>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub documents: usize,
    pub processes: usize,
}

/// Loads a JSON bundle of catalog documents and processes. Newly seen
/// processes get an initial CREATED status.
pub async fn import(store: &SqliteStoreAdapter, file: &Path) -> Result<ImportSummary> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let bundle: ImportBundle = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;

    let mut summary = ImportSummary::default();
    for doc in &bundle.documents {
        store.put_document(doc.kind, &doc.key, &doc.body).await?;
        summary.documents += 1;
    }
    for process in &bundle.processes {
        let known = store.latest_process_status(&process.process_id).await?;
        store.upsert_process(process).await?;
        if known.is_none() {
            store
                .add_process_status(
                    &process.process_id,
                    &ProcessStatus {
                        state: ProcessState::Created,
                        reason: None,
                        time_of_change: time::OffsetDateTime::now_utc(),
                    },
                )
                .await?;
        }
        summary.processes += 1;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing;

    fn args(process_id: &str) -> ProcessArgs {
        ProcessArgs {
            process_id: process_id.into(),
            experiment: format!("EXP_{process_id}"),
            gateway: "gw".into(),
            token: "tok".into(),
        }
    }

    #[tokio::test]
    async fn import_registers_documents_and_created_processes() {
        let store = SqliteStoreAdapter::new(EngineStore::open_memory().await.unwrap());
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bundle.json");
        let process = serde_json::to_value(testing::process("P1")).unwrap();
        let bundle = serde_json::json!({
            "documents": [
                {"kind": "storage_resource", "key": "sr-1", "body": {
                    "storage_resource_id": "sr-1",
                    "host_name": "storage.example.org",
                    "data_movement_interfaces": []
                }}
            ],
            "processes": [process]
        });
        std::fs::write(&file, serde_json::to_vec(&bundle).unwrap()).unwrap();

        let summary = import(&store, &file).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                documents: 1,
                processes: 1
            }
        );
        assert!(store.storage_resource("sr-1").await.unwrap().is_some());
        let status = store.latest_process_status("P1").await.unwrap().unwrap();
        assert_eq!(status.state, ProcessState::Created);

        // a second import keeps the existing history
        import(&store, &file).await.unwrap();
        assert!(store.get_process("P1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancel_marks_the_process_before_enqueueing() {
        let store = SqliteStoreAdapter::new(EngineStore::open_memory().await.unwrap());
        cancel(&store, args("P1")).await.unwrap();

        assert!(store.exists(&paths::cancel_marker("EXP_P1", "P1")).await.unwrap());
        let delivery = store.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.message.kind, LaunchKind::Cancel);
        assert_eq!(delivery.message.process_id, "P1");
    }

    #[tokio::test]
    async fn launch_requires_a_registered_process() {
        let store = SqliteStoreAdapter::new(EngineStore::open_memory().await.unwrap());
        assert!(launch(&store, args("P1")).await.is_err());

        testing::seed_process(&store, &testing::process("P1")).await;
        launch(&store, args("P1")).await.unwrap();
        let delivery = store.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.message.kind, LaunchKind::Launch);
        assert!(!delivery.redelivered);
    }
}
