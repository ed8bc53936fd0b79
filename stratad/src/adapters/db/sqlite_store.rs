// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::adapters::db::{EngineStore, StoreError};
use crate::app::catalog::{
    ApplicationDeployment, ApplicationInterface, CatalogKind, ComputeResource,
    GatewayResourceProfile, GroupResourceProfile, StorageResource, UserResourceProfile,
    user_profile_key,
};
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{
    CatalogPort, CoordinationPort, Delivery, JobNotification, LaunchMessage, LaunchQueuePort,
    NotificationSourcePort, RegistryPort,
};
use crate::app::types::{
    ErrorRecord, ErrorTarget, ExperimentState, JobModel, JobState, JobStatus, ProcessModel,
    ProcessStatus, TaskModel, TaskStatus,
};

#[derive(Clone)]
pub struct SqliteStoreAdapter {
    store: Arc<EngineStore>,
}

impl SqliteStoreAdapter {
    pub fn new(store: EngineStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    async fn document<T: DeserializeOwned>(
        &self,
        kind: CatalogKind,
        key: &str,
    ) -> AppResult<Option<T>> {
        let Some(body) = self
            .store
            .get_document(kind.as_str(), key)
            .await
            .map_err(map_catalog_error)?
        else {
            return Ok(None);
        };
        serde_json::from_str(&body).map(Some).map_err(|err| {
            AppError::catalog(format!("{} '{}' is malformed: {}", kind.as_str(), key, err))
        })
    }
}

/// Persistence failures become app-level errors here so the engine never
/// sees sqlx types.
fn map_store_error(err: StoreError) -> AppError {
    match err {
        StoreError::EmptyId => AppError::with_message(
            AppErrorKind::InvalidArgument,
            codes::INVALID_ARGUMENT,
            "empty identifier",
        ),
        StoreError::UnknownProcess(task_id) => AppError::with_message(
            AppErrorKind::NotFound,
            codes::NOT_FOUND,
            format!("task '{task_id}' references a process that is not registered"),
        ),
        other => AppError::internal(other.to_string()),
    }
}

/// Catalog reads surface as catalog-access failures regardless of cause.
fn map_catalog_error(err: StoreError) -> AppError {
    AppError::catalog(err.to_string())
}

#[async_trait]
impl RegistryPort for SqliteStoreAdapter {
    async fn get_process(&self, process_id: &str) -> AppResult<Option<ProcessModel>> {
        self.store
            .get_process(process_id)
            .await
            .map_err(map_store_error)
    }

    async fn upsert_process(&self, process: &ProcessModel) -> AppResult<()> {
        self.store
            .upsert_process(process)
            .await
            .map_err(map_store_error)
    }

    async fn latest_process_status(&self, process_id: &str) -> AppResult<Option<ProcessStatus>> {
        self.store
            .latest_process_status(process_id)
            .await
            .map_err(map_store_error)
    }

    async fn add_process_status(&self, process_id: &str, status: &ProcessStatus) -> AppResult<()> {
        self.store
            .add_process_status(process_id, status)
            .await
            .map_err(map_store_error)
    }

    async fn add_task(&self, task: &TaskModel) -> AppResult<()> {
        self.store.add_task(task).await.map_err(map_store_error)
    }

    async fn list_tasks(&self, process_id: &str) -> AppResult<Vec<TaskModel>> {
        self.store
            .list_tasks(process_id)
            .await
            .map_err(map_store_error)
    }

    async fn latest_task_status(&self, task_id: &str) -> AppResult<Option<TaskStatus>> {
        self.store
            .latest_task_status(task_id)
            .await
            .map_err(map_store_error)
    }

    async fn add_task_status(&self, task_id: &str, status: &TaskStatus) -> AppResult<()> {
        self.store
            .add_task_status(task_id, status)
            .await
            .map_err(map_store_error)
    }

    async fn upsert_job(&self, job: &JobModel) -> AppResult<()> {
        self.store.upsert_job(job).await.map_err(map_store_error)
    }

    async fn job_for_process(&self, process_id: &str) -> AppResult<Option<JobModel>> {
        self.store
            .job_for_process(process_id)
            .await
            .map_err(map_store_error)
    }

    async fn job_by_id(&self, job_id: &str) -> AppResult<Option<JobModel>> {
        self.store.job_by_id(job_id).await.map_err(map_store_error)
    }

    async fn latest_job_status(&self, job_id: &str) -> AppResult<Option<JobStatus>> {
        self.store
            .latest_job_status(job_id)
            .await
            .map_err(map_store_error)
    }

    async fn add_job_status(&self, job_id: &str, status: &JobStatus) -> AppResult<()> {
        self.store
            .add_job_status(job_id, status)
            .await
            .map_err(map_store_error)
    }

    async fn add_experiment_status(
        &self,
        experiment_id: &str,
        state: ExperimentState,
        reason: Option<&str>,
    ) -> AppResult<()> {
        self.store
            .add_experiment_status(experiment_id, state, reason)
            .await
            .map_err(map_store_error)
    }

    async fn latest_experiment_state(
        &self,
        experiment_id: &str,
    ) -> AppResult<Option<ExperimentState>> {
        self.store
            .latest_experiment_state(experiment_id)
            .await
            .map_err(map_store_error)
    }

    async fn add_error(&self, target: &ErrorTarget, error: &ErrorRecord) -> AppResult<()> {
        self.store
            .add_error(target, error)
            .await
            .map_err(map_store_error)
    }

    async fn list_errors(&self, target: &ErrorTarget) -> AppResult<Vec<ErrorRecord>> {
        self.store.list_errors(target).await.map_err(map_store_error)
    }
}

#[async_trait]
impl CatalogPort for SqliteStoreAdapter {
    async fn compute_resource(&self, id: &str) -> AppResult<Option<ComputeResource>> {
        self.document(CatalogKind::ComputeResource, id).await
    }

    async fn storage_resource(&self, id: &str) -> AppResult<Option<StorageResource>> {
        self.document(CatalogKind::StorageResource, id).await
    }

    async fn application_deployment(&self, id: &str) -> AppResult<Option<ApplicationDeployment>> {
        self.document(CatalogKind::ApplicationDeployment, id).await
    }

    async fn application_interface(&self, id: &str) -> AppResult<Option<ApplicationInterface>> {
        self.document(CatalogKind::ApplicationInterface, id).await
    }

    async fn gateway_profile(&self, gateway_id: &str) -> AppResult<Option<GatewayResourceProfile>> {
        self.document(CatalogKind::GatewayProfile, gateway_id).await
    }

    async fn group_profile(&self, profile_id: &str) -> AppResult<Option<GroupResourceProfile>> {
        self.document(CatalogKind::GroupProfile, profile_id).await
    }

    async fn user_profile(
        &self,
        user_id: &str,
        gateway_id: &str,
    ) -> AppResult<Option<UserResourceProfile>> {
        self.document(CatalogKind::UserProfile, &user_profile_key(user_id, gateway_id))
            .await
    }

    async fn put_document(
        &self,
        kind: CatalogKind,
        key: &str,
        body: &serde_json::Value,
    ) -> AppResult<()> {
        self.store
            .put_document(kind.as_str(), key, body)
            .await
            .map_err(map_store_error)
    }
}

#[async_trait]
impl CoordinationPort for SqliteStoreAdapter {
    async fn set(&self, path: &str, data: &str) -> AppResult<()> {
        self.store.set_node(path, data).await.map_err(map_store_error)
    }

    async fn get(&self, path: &str) -> AppResult<Option<String>> {
        self.store.get_node(path).await.map_err(map_store_error)
    }

    async fn delete_tree(&self, path: &str) -> AppResult<()> {
        let removed = self
            .store
            .delete_node_tree(path)
            .await
            .map_err(map_store_error)?;
        tracing::debug!(path, removed, "deleted coordination subtree");
        Ok(())
    }
}

#[async_trait]
impl LaunchQueuePort for SqliteStoreAdapter {
    async fn publish(&self, message: &LaunchMessage) -> AppResult<i64> {
        self.store.publish(message).await.map_err(map_store_error)
    }

    async fn next_delivery(&self) -> AppResult<Option<Delivery>> {
        self.store.next_delivery().await.map_err(map_store_error)
    }

    async fn ack(&self, delivery_tag: i64) -> AppResult<()> {
        let acked = self.store.ack(delivery_tag).await.map_err(map_store_error)?;
        if !acked {
            tracing::warn!(delivery_tag, "delivery was already acknowledged");
        }
        Ok(())
    }

    async fn requeue_unacked(&self) -> AppResult<u64> {
        self.store.requeue_unacked().await.map_err(map_store_error)
    }
}

#[async_trait]
impl NotificationSourcePort for SqliteStoreAdapter {
    async fn push(&self, job_id: &str, state: JobState) -> AppResult<()> {
        self.store
            .push_notification(job_id, state)
            .await
            .map(|_| ())
            .map_err(map_store_error)
    }

    async fn pending(&self) -> AppResult<Vec<JobNotification>> {
        self.store
            .pending_notifications()
            .await
            .map_err(map_store_error)
    }

    async fn consume(&self, id: i64) -> AppResult<()> {
        self.store
            .consume_notification(id)
            .await
            .map_err(map_store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::ResourceJobManagerType;

    #[tokio::test]
    async fn catalog_documents_decode_into_typed_records() {
        let adapter = SqliteStoreAdapter::new(EngineStore::open_memory().await.expect("store"));
        let body = serde_json::json!({
            "compute_resource_id": "cr-1",
            "host_name": "login.cluster.org",
            "job_submission_interfaces": [{
                "protocol": "SSH",
                "security_protocol": "SSH_KEYS",
                "resource_job_manager": {"job_manager_type": "SLURM"}
            }]
        });
        adapter
            .put_document(CatalogKind::ComputeResource, "cr-1", &body)
            .await
            .expect("put");
        let resource = adapter
            .compute_resource("cr-1")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(resource.host_name, "login.cluster.org");
        assert_eq!(
            resource.job_submission_interfaces[0]
                .resource_job_manager
                .job_manager_type,
            ResourceJobManagerType::SLURM
        );
        assert!(adapter.compute_resource("missing").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn malformed_catalog_document_is_catalog_error() {
        let adapter = SqliteStoreAdapter::new(EngineStore::open_memory().await.expect("store"));
        adapter
            .put_document(
                CatalogKind::ApplicationDeployment,
                "dep",
                &serde_json::json!({"unexpected": true}),
            )
            .await
            .expect("put");
        let err = adapter
            .application_deployment("dep")
            .await
            .expect_err("malformed");
        assert_eq!(err.kind(), AppErrorKind::CatalogAccess);
    }

    #[tokio::test]
    async fn user_profiles_are_keyed_by_user_and_gateway() {
        let adapter = SqliteStoreAdapter::new(EngineStore::open_memory().await.expect("store"));
        let body = serde_json::json!({"user_id": "alice", "gateway_id": "gw"});
        adapter
            .put_document(CatalogKind::UserProfile, &user_profile_key("alice", "gw"), &body)
            .await
            .expect("put");
        assert!(adapter.user_profile("alice", "gw").await.expect("get").is_some());
        assert!(adapter.user_profile("alice", "other").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn exists_uses_get() {
        let adapter = SqliteStoreAdapter::new(EngineStore::open_memory().await.expect("store"));
        assert!(!adapter.exists("/experiments/E/P/cancel").await.expect("exists"));
        adapter.set("/experiments/E/P/cancel", "1").await.expect("set");
        assert!(adapter.exists("/experiments/E/P/cancel").await.expect("exists"));
    }
}
