// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Generates `as_str`, `Display` and a case-insensitive `FromStr` for wire enums.
macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Created,
    Validated,
    Started,
    PreProcessing,
    ConfiguringWorkspace,
    InputDataStaging,
    Executing,
    Monitoring,
    OutputDataStaging,
    PostProcessing,
    Completed,
    Cancelling,
    Canceled,
    Failed,
}

wire_enum!(ProcessState {
    Created => "CREATED",
    Validated => "VALIDATED",
    Started => "STARTED",
    PreProcessing => "PRE_PROCESSING",
    ConfiguringWorkspace => "CONFIGURING_WORKSPACE",
    InputDataStaging => "INPUT_DATA_STAGING",
    Executing => "EXECUTING",
    Monitoring => "MONITORING",
    OutputDataStaging => "OUTPUT_DATA_STAGING",
    PostProcessing => "POST_PROCESSING",
    Completed => "COMPLETED",
    Cancelling => "CANCELLING",
    Canceled => "CANCELED",
    Failed => "FAILED",
});

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessState::Completed | ProcessState::Canceled | ProcessState::Failed
        )
    }

    /// States a fresh launch message is allowed to start from.
    pub fn is_launchable(self) -> bool {
        matches!(
            self,
            ProcessState::Created | ProcessState::Validated | ProcessState::Started
        )
    }

    fn forward_rank(self) -> Option<u8> {
        let rank = match self {
            ProcessState::Created => 0,
            ProcessState::Validated => 1,
            ProcessState::Started => 2,
            ProcessState::PreProcessing => 3,
            ProcessState::ConfiguringWorkspace => 4,
            ProcessState::InputDataStaging => 5,
            ProcessState::Executing => 6,
            ProcessState::Monitoring => 7,
            ProcessState::OutputDataStaging => 8,
            ProcessState::PostProcessing => 9,
            ProcessState::Completed => 10,
            ProcessState::Cancelling | ProcessState::Canceled | ProcessState::Failed => {
                return None;
            }
        };
        Some(rank)
    }

    /// Forward moves may skip states; re-entering the current state is allowed so
    /// a resumed task can publish its state again. Terminal states never move.
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            ProcessState::Failed | ProcessState::Cancelling | ProcessState::Canceled => true,
            _ => match (self.forward_rank(), next.forward_rank()) {
                (Some(current), Some(target)) => target >= current,
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentState {
    Created,
    Launched,
    Executing,
    Cancelling,
    Canceled,
    Completed,
    Failed,
}

wire_enum!(ExperimentState {
    Created => "CREATED",
    Launched => "LAUNCHED",
    Executing => "EXECUTING",
    Cancelling => "CANCELLING",
    Canceled => "CANCELED",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Created,
    Executing,
    Completed,
    Failed,
    Canceled,
}

wire_enum!(TaskState {
    Created => "CREATED",
    Executing => "EXECUTING",
    Completed => "COMPLETED",
    Failed => "FAILED",
    Canceled => "CANCELED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    EnvSetup,
    DataStaging,
    JobSubmission,
    Monitoring,
    EnvCleanup,
    /// Synthesized after submission for streaming outputs; never part of the task order.
    OutputFetching,
}

wire_enum!(TaskType {
    EnvSetup => "ENV_SETUP",
    DataStaging => "DATA_STAGING",
    JobSubmission => "JOB_SUBMISSION",
    Monitoring => "MONITORING",
    EnvCleanup => "ENV_CLEANUP",
    OutputFetching => "OUTPUT_FETCHING",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Submitted,
    Queued,
    Active,
    Suspended,
    Complete,
    Canceled,
    Failed,
    Unknown,
}

wire_enum!(JobState {
    Submitted => "SUBMITTED",
    Queued => "QUEUED",
    Active => "ACTIVE",
    Suspended => "SUSPENDED",
    Complete => "COMPLETE",
    Canceled => "CANCELED",
    Failed => "FAILED",
    Unknown => "UNKNOWN",
});

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Canceled | JobState::Failed)
    }

    /// States in which streaming outputs are still being produced.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            JobState::Submitted | JobState::Queued | JobState::Active
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobSubmissionProtocol {
    Local,
    Ssh,
    SshFork,
    Cloud,
    Unicore,
}

wire_enum!(JobSubmissionProtocol {
    Local => "LOCAL",
    Ssh => "SSH",
    SshFork => "SSH_FORK",
    Cloud => "CLOUD",
    Unicore => "UNICORE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataMovementProtocol {
    Local,
    Scp,
    Sftp,
    GridFtp,
    UnicoreStorageService,
}

wire_enum!(DataMovementProtocol {
    Local => "LOCAL",
    Scp => "SCP",
    Sftp => "SFTP",
    GridFtp => "GRID_FTP",
    UnicoreStorageService => "UNICORE_STORAGE_SERVICE",
});

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceJobManagerType {
    PBS,
    SLURM,
    LSF,
    UGE,
    FORK,
}

wire_enum!(ResourceJobManagerType {
    PBS => "PBS",
    SLURM => "SLURM",
    LSF => "LSF",
    UGE => "UGE",
    FORK => "FORK",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorMode {
    JobStatusPolling,
    Notification,
}

wire_enum!(MonitorMode {
    JobStatusPolling => "JOB_STATUS_POLLING",
    Notification => "NOTIFICATION",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityProtocol {
    SshKeys,
    Local,
    UsernamePassword,
    Gsi,
}

wire_enum!(SecurityProtocol {
    SshKeys => "SSH_KEYS",
    Local => "LOCAL",
    UsernamePassword => "USERNAME_PASSWORD",
    Gsi => "GSI",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    #[default]
    String,
    Integer,
    Float,
    Uri,
    UriCollection,
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    Input,
    Output,
    ArchiveOutput,
}

wire_enum!(StageKind {
    Input => "INPUT",
    Output => "OUTPUT",
    ArchiveOutput => "ARCHIVE_OUTPUT",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub state: ProcessState,
    pub reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub time_of_change: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub time_of_change: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub time_of_change: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct InputDataObject {
    pub name: String,
    pub value: Option<String>,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub add_to_command_line: bool,
    #[serde(default)]
    pub command_line_arg: Option<String>,
    #[serde(default)]
    pub order: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OutputDataObject {
    pub name: String,
    pub value: Option<String>,
    #[serde(default)]
    pub data_type: DataType,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub output_streaming: bool,
    #[serde(default = "default_true")]
    pub data_movement: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceScheduling {
    pub queue_name: Option<String>,
    pub node_count: Option<u32>,
    pub total_cpu_count: Option<u32>,
    /// Minutes.
    pub wall_time_limit: Option<u32>,
    /// Megabytes.
    pub total_physical_memory: Option<u32>,
    pub override_login_user_name: Option<String>,
    pub override_scratch_location: Option<String>,
    pub override_allocation_project_number: Option<String>,
}

/// One experiment's execution, as persisted in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessModel {
    pub process_id: String,
    pub experiment_id: String,
    pub gateway_id: String,
    pub user_name: String,
    pub compute_resource_id: String,
    pub application_interface_id: String,
    pub application_deployment_id: String,
    #[serde(default)]
    pub group_resource_profile_id: Option<String>,
    #[serde(default)]
    pub storage_resource_id: Option<String>,
    #[serde(default)]
    pub experiment_data_dir: Option<String>,
    #[serde(default)]
    pub task_order: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<InputDataObject>,
    #[serde(default)]
    pub outputs: Vec<OutputDataObject>,
    #[serde(default)]
    pub scheduling: ResourceScheduling,
    #[serde(default)]
    pub use_user_compute_preference: bool,
    #[serde(default)]
    pub archive: bool,
    #[serde(default)]
    pub cleanup_scratch: bool,
}

/// Type-specific task payload, persisted as a JSON blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPayload {
    EnvSetup {
        location: String,
    },
    DataStaging {
        source: String,
        destination: String,
        stage_kind: StageKind,
        #[serde(default)]
        input_name: Option<String>,
        #[serde(default)]
        output_name: Option<String>,
    },
    JobSubmission {
        job_name: String,
    },
    Monitoring {
        mode: MonitorMode,
    },
    EnvCleanup {
        location: String,
    },
    OutputFetching {
        outputs: Vec<String>,
    },
}

impl TaskPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::EnvSetup { .. } => TaskType::EnvSetup,
            TaskPayload::DataStaging { .. } => TaskType::DataStaging,
            TaskPayload::JobSubmission { .. } => TaskType::JobSubmission,
            TaskPayload::Monitoring { .. } => TaskType::Monitoring,
            TaskPayload::EnvCleanup { .. } => TaskType::EnvCleanup,
            TaskPayload::OutputFetching { .. } => TaskType::OutputFetching,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskModel {
    pub task_id: String,
    pub parent_process_id: String,
    pub payload: TaskPayload,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_time: OffsetDateTime,
}

impl TaskModel {
    pub fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobModel {
    pub job_id: String,
    pub task_id: String,
    pub process_id: String,
    pub job_name: String,
    pub job_description: String,
    pub working_dir: String,
    pub std_out: Option<String>,
    pub std_err: Option<String>,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub actual_message: String,
    pub user_friendly_message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorTarget {
    Task(String),
    Process(String),
    Experiment(String),
}

impl ErrorTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            ErrorTarget::Task(_) => "task",
            ErrorTarget::Process(_) => "process",
            ErrorTarget::Experiment(_) => "experiment",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ErrorTarget::Task(id) | ErrorTarget::Process(id) | ErrorTarget::Experiment(id) => id,
        }
    }
}

/// Host, port and identity a remote cluster handle talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub login_user: String,
    pub credential_token: String,
}

/// SSH key material resolved from a credential token.
#[derive(Clone)]
pub struct SshCredential {
    pub private_key: String,
    pub public_key: Option<String>,
    pub passphrase: Option<String>,
}

impl fmt::Debug for SshCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredential")
            .field("has_public_key", &self.public_key.is_some())
            .field("has_passphrase", &self.passphrase.is_some())
            .finish()
    }
}
