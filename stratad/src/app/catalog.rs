// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Read-only views of the application and resource catalogs.
//!
//! Records are stored as JSON documents; every field a gateway may leave out
//! carries a serde default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::app::types::{
    DataMovementProtocol, InputDataObject, JobSubmissionProtocol, MonitorMode,
    OutputDataObject, ResourceJobManagerType, SecurityProtocol,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceJobManager {
    pub job_manager_type: ResourceJobManagerType,
    /// Directory holding the scheduler binaries; empty means rely on `PATH`.
    #[serde(default)]
    pub job_manager_bin_path: Option<String>,
    /// Overrides for individual scheduler commands keyed by operation name
    /// (`submit`, `cancel`, `status`, `job_id_by_name`, `bulk_status`).
    #[serde(default)]
    pub command_overrides: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSubmissionInterface {
    pub protocol: JobSubmissionProtocol,
    #[serde(default)]
    pub priority: u32,
    pub security_protocol: SecurityProtocol,
    pub resource_job_manager: ResourceJobManager,
    #[serde(default = "default_monitor_mode")]
    pub monitor_mode: MonitorMode,
    #[serde(default)]
    pub ssh_port: Option<u16>,
}

fn default_monitor_mode() -> MonitorMode {
    MonitorMode::JobStatusPolling
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMovementInterface {
    pub protocol: DataMovementProtocol,
    #[serde(default)]
    pub priority: u32,
    pub security_protocol: SecurityProtocol,
    #[serde(default)]
    pub ssh_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeResource {
    pub compute_resource_id: String,
    pub host_name: String,
    #[serde(default)]
    pub job_submission_interfaces: Vec<JobSubmissionInterface>,
    #[serde(default)]
    pub data_movement_interfaces: Vec<DataMovementInterface>,
    #[serde(default)]
    pub gateway_usage_reporting: bool,
    #[serde(default)]
    pub gateway_usage_module_load_command: Option<String>,
    #[serde(default)]
    pub gateway_usage_executable: Option<String>,
}

impl ComputeResource {
    /// Lowest priority value wins, matching how gateways order interfaces.
    pub fn preferred_submission(
        &self,
        protocol: Option<JobSubmissionProtocol>,
    ) -> Option<&JobSubmissionInterface> {
        let mut candidates: Vec<&JobSubmissionInterface> = self
            .job_submission_interfaces
            .iter()
            .filter(|iface| protocol.is_none_or(|p| iface.protocol == p))
            .collect();
        candidates.sort_by_key(|iface| iface.priority);
        candidates.into_iter().next()
    }

    pub fn preferred_data_movement(
        &self,
        protocol: Option<DataMovementProtocol>,
    ) -> Option<&DataMovementInterface> {
        let mut candidates: Vec<&DataMovementInterface> = self
            .data_movement_interfaces
            .iter()
            .filter(|iface| protocol.is_none_or(|p| iface.protocol == p))
            .collect();
        candidates.sort_by_key(|iface| iface.priority);
        candidates.into_iter().next()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageResource {
    pub storage_resource_id: String,
    pub host_name: String,
    #[serde(default)]
    pub data_movement_interfaces: Vec<DataMovementInterface>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Parallelism {
    #[default]
    Serial,
    Mpi,
    OpenMp,
    OpenMpMpi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetEnvPath {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDeployment {
    pub app_deployment_id: String,
    pub compute_host_id: String,
    pub executable_path: String,
    #[serde(default)]
    pub parallelism: Parallelism,
    #[serde(default)]
    pub module_load_cmds: Vec<String>,
    #[serde(default)]
    pub set_environment: Vec<SetEnvPath>,
    #[serde(default)]
    pub pre_job_commands: Vec<String>,
    #[serde(default)]
    pub post_job_commands: Vec<String>,
    #[serde(default)]
    pub default_queue_name: Option<String>,
    #[serde(default)]
    pub default_node_count: Option<u32>,
    #[serde(default)]
    pub default_cpu_count: Option<u32>,
    #[serde(default)]
    pub default_walltime: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInterface {
    pub application_interface_id: String,
    pub application_name: String,
    #[serde(default)]
    pub inputs: Vec<InputDataObject>,
    #[serde(default)]
    pub outputs: Vec<OutputDataObject>,
    #[serde(default)]
    pub archive_working_directory: bool,
}

/// Per-resource settings shared by gateway, group and user preference layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ComputePreference {
    pub compute_resource_id: String,
    #[serde(default)]
    pub login_user_name: Option<String>,
    #[serde(default)]
    pub preferred_job_submission_protocol: Option<JobSubmissionProtocol>,
    #[serde(default)]
    pub preferred_data_movement_protocol: Option<DataMovementProtocol>,
    #[serde(default)]
    pub preferred_batch_queue: Option<String>,
    #[serde(default)]
    pub scratch_location: Option<String>,
    #[serde(default)]
    pub allocation_project_number: Option<String>,
    #[serde(default)]
    pub resource_specific_credential_store_token: Option<String>,
    #[serde(default)]
    pub usage_reporting_gateway_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StoragePreference {
    pub storage_resource_id: String,
    #[serde(default)]
    pub login_user_name: Option<String>,
    #[serde(default)]
    pub file_system_root_location: Option<String>,
    #[serde(default)]
    pub resource_specific_credential_store_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResourceProfile {
    pub gateway_id: String,
    #[serde(default)]
    pub credential_store_token: Option<String>,
    #[serde(default)]
    pub compute_resource_preferences: Vec<ComputePreference>,
    #[serde(default)]
    pub storage_preferences: Vec<StoragePreference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupResourceProfile {
    pub group_resource_profile_id: String,
    pub gateway_id: String,
    #[serde(default)]
    pub default_credential_store_token: Option<String>,
    #[serde(default)]
    pub compute_preferences: Vec<ComputePreference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResourceProfile {
    pub user_id: String,
    pub gateway_id: String,
    #[serde(default)]
    pub credential_store_token: Option<String>,
    #[serde(default)]
    pub user_compute_resource_preferences: Vec<ComputePreference>,
    #[serde(default)]
    pub user_storage_preferences: Vec<StoragePreference>,
}

/// Document kinds addressable through the catalog store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    ComputeResource,
    StorageResource,
    ApplicationDeployment,
    ApplicationInterface,
    GatewayProfile,
    GroupProfile,
    UserProfile,
}

impl CatalogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CatalogKind::ComputeResource => "compute_resource",
            CatalogKind::StorageResource => "storage_resource",
            CatalogKind::ApplicationDeployment => "application_deployment",
            CatalogKind::ApplicationInterface => "application_interface",
            CatalogKind::GatewayProfile => "gateway_profile",
            CatalogKind::GroupProfile => "group_profile",
            CatalogKind::UserProfile => "user_profile",
        }
    }
}

pub fn user_profile_key(user_id: &str, gateway_id: &str) -> String {
    format!("{user_id}@{gateway_id}")
}
