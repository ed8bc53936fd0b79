// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use crate::app::catalog::{
    ApplicationDeployment, ApplicationInterface, ComputeResource, JobSubmissionInterface,
    StorageResource,
};
use crate::app::engine::preferences::{ResolvedCompute, ResolvedStorage};
use crate::app::ports::{ClusterAccess, ClusterSpec};
use crate::app::services::managers::JobManager;
use crate::app::services::shell::join_remote;
use crate::app::services::uri;
use crate::app::types::{
    DataMovementProtocol, JobModel, JobSubmissionProtocol, MonitorMode, ProcessModel,
    ProcessState, ServerInfo,
};

pub const DEFAULT_SSH_PORT: u16 = 22;

#[derive(Debug, Clone)]
pub struct StorageTarget {
    pub resource: StorageResource,
    pub resolved: ResolvedStorage,
    pub protocol: DataMovementProtocol,
    pub port: u16,
}

/// Everything a worker needs to drive one process: the persisted record, the
/// catalog entries it refers to, resolved preferences and derived paths.
#[derive(Debug, Clone)]
pub struct ProcessContext {
    pub process: ProcessModel,
    pub token_id: String,
    pub state: ProcessState,
    pub compute_resource: ComputeResource,
    pub deployment: ApplicationDeployment,
    pub interface: ApplicationInterface,
    pub compute: ResolvedCompute,
    pub submission: JobSubmissionInterface,
    pub data_movement: DataMovementProtocol,
    pub job_manager: JobManager,
    pub storage: Option<StorageTarget>,
    pub working_dir: String,
    pub input_dir: String,
    pub output_dir: String,
    pub stdout_path: String,
    pub stderr_path: String,
    pub local_working_dir: PathBuf,
    pub job: Option<JobModel>,
    pub current_task_id: Option<String>,
    /// A cancel marker was seen at a task boundary; no further task starts.
    pub interrupted: bool,
    pub complete: bool,
    pub cancel_requested: bool,
    pub recovery_with_cancel: bool,
    /// Error records for the current failure were already written.
    pub failure_recorded: bool,
}

impl ProcessContext {
    pub fn process_id(&self) -> &str {
        &self.process.process_id
    }

    pub fn experiment_id(&self) -> &str {
        &self.process.experiment_id
    }

    pub fn gateway_id(&self) -> &str {
        &self.process.gateway_id
    }

    pub fn protocol(&self) -> JobSubmissionProtocol {
        self.submission.protocol
    }

    pub fn monitor_mode(&self) -> MonitorMode {
        self.submission.monitor_mode
    }

    pub fn compute_host(&self) -> &str {
        &self.compute_resource.host_name
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job
            .as_ref()
            .map(|job| job.job_id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn compute_server(&self) -> ServerInfo {
        ServerInfo {
            host: self.compute_resource.host_name.clone(),
            port: self.submission.ssh_port.unwrap_or(DEFAULT_SSH_PORT),
            login_user: self.compute.login_user.clone(),
            credential_token: self.compute.credential_token.clone(),
        }
    }

    pub fn compute_spec(&self) -> ClusterSpec {
        ClusterSpec {
            resource_id: self.compute_resource.compute_resource_id.clone(),
            access: ClusterAccess::Submission(self.submission.protocol),
            server: self.compute_server(),
            gateway_id: self.process.gateway_id.clone(),
            job_manager: Some(self.submission.resource_job_manager.clone()),
        }
    }

    /// File-only handle on the compute host, reached over the resolved data
    /// movement protocol.
    pub fn transfer_spec(&self) -> ClusterSpec {
        ClusterSpec {
            resource_id: self.compute_resource.compute_resource_id.clone(),
            access: ClusterAccess::Transfer(self.data_movement),
            server: self.compute_server(),
            gateway_id: self.process.gateway_id.clone(),
            job_manager: None,
        }
    }

    /// File-only handle on the storage resource.
    pub fn storage_spec(&self) -> Option<ClusterSpec> {
        let storage = self.storage.as_ref()?;
        Some(ClusterSpec {
            resource_id: storage.resource.storage_resource_id.clone(),
            access: ClusterAccess::Transfer(storage.protocol),
            server: ServerInfo {
                host: storage.resource.host_name.clone(),
                port: storage.port,
                login_user: storage.resolved.login_user.clone(),
                credential_token: storage.resolved.credential_token.clone(),
            },
            gateway_id: self.process.gateway_id.clone(),
            job_manager: None,
        })
    }

    /// Where outputs of this experiment land: the experiment data dir on the
    /// storage resource, or the local working dir when there is no storage.
    pub fn output_destination(&self, file_name: &str) -> String {
        match &self.storage {
            Some(storage) => {
                let dir = self.process.experiment_data_dir.clone().unwrap_or_else(|| {
                    join_remote(
                        &join_remote(&storage.resolved.root, &self.process.user_name),
                        &self.process.experiment_id,
                    )
                });
                uri::ssh_uri(
                    &storage.resolved.login_user,
                    &storage.resource.host_name,
                    storage.port,
                    &join_remote(&dir, file_name),
                )
            }
            None => format!(
                "file://{}",
                self.local_working_dir.join(file_name).display()
            ),
        }
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self.state, ProcessState::Executing | ProcessState::Monitoring)
    }
}
