// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::adapters::ssh::SshSessionProvider;
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ClusterAccess, ClusterSpec, RemoteCluster, RemoteClusterFactory};
use crate::app::services::managers::JobManager;
use crate::app::types::{DataMovementProtocol, JobSubmissionProtocol};

mod hpc;
mod local;

pub use hpc::HpcCluster;
pub use local::LocalCluster;

type Builder = fn(&ClusterSpec, &Arc<SshSessionProvider>) -> Arc<dyn RemoteCluster>;

fn build_local(spec: &ClusterSpec, _ssh: &Arc<SshSessionProvider>) -> Arc<dyn RemoteCluster> {
    let manager = spec.job_manager.as_ref().map(JobManager::from_resource);
    Arc::new(LocalCluster::new(spec.server.clone(), manager))
}

fn build_hpc(spec: &ClusterSpec, ssh: &Arc<SshSessionProvider>) -> Arc<dyn RemoteCluster> {
    let manager = spec.job_manager.as_ref().map(JobManager::from_resource);
    Arc::new(HpcCluster::new(
        spec.server.clone(),
        spec.gateway_id.clone(),
        manager,
        Arc::clone(ssh),
    ))
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct HandleKey {
    login_user: String,
    access: ClusterAccess,
    resource_id: String,
    credential_token: String,
}

/// Builds cluster handles by submission or data movement protocol and caches
/// them per (login user, access, resource, credential token). Protocols
/// without a builder fail at construction.
pub struct ClusterRegistry {
    builders: HashMap<ClusterAccess, Builder>,
    handles: Mutex<HashMap<HandleKey, Arc<dyn RemoteCluster>>>,
    ssh: Arc<SshSessionProvider>,
}

impl ClusterRegistry {
    pub fn new(ssh: Arc<SshSessionProvider>) -> Self {
        let mut builders: HashMap<ClusterAccess, Builder> = HashMap::new();
        builders.insert(ClusterAccess::Submission(JobSubmissionProtocol::Local), build_local);
        builders.insert(ClusterAccess::Submission(JobSubmissionProtocol::Ssh), build_hpc);
        builders.insert(ClusterAccess::Submission(JobSubmissionProtocol::SshFork), build_hpc);
        builders.insert(ClusterAccess::Submission(JobSubmissionProtocol::Cloud), build_hpc);
        builders.insert(ClusterAccess::Transfer(DataMovementProtocol::Local), build_local);
        builders.insert(ClusterAccess::Transfer(DataMovementProtocol::Scp), build_hpc);
        builders.insert(ClusterAccess::Transfer(DataMovementProtocol::Sftp), build_hpc);
        Self {
            builders,
            handles: Mutex::new(HashMap::new()),
            ssh,
        }
    }
}

#[async_trait]
impl RemoteClusterFactory for ClusterRegistry {
    async fn cluster(&self, spec: &ClusterSpec) -> AppResult<Arc<dyn RemoteCluster>> {
        let Some(builder) = self.builders.get(&spec.access) else {
            return Err(AppError::remote_init(format!(
                "{} is not supported for resource {}",
                spec.access, spec.resource_id
            )));
        };
        if !spec.access.is_local() && spec.server.host.trim().is_empty() {
            return Err(AppError::remote_init(format!(
                "resource {} has no host name",
                spec.resource_id
            )));
        }
        let key = HandleKey {
            login_user: spec.server.login_user.clone(),
            access: spec.access,
            resource_id: spec.resource_id.clone(),
            credential_token: spec.server.credential_token.clone(),
        };
        let mut handles = self.handles.lock().await;
        if let Some(existing) = handles.get(&key) {
            return Ok(Arc::clone(existing));
        }
        tracing::debug!(
            resource = %spec.resource_id,
            access = %spec.access,
            user = %spec.server.login_user,
            "building cluster handle"
        );
        let handle = builder(spec, &self.ssh);
        handles.insert(key, Arc::clone(&handle));
        Ok(handle)
    }
}
