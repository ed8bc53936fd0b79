// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::app::catalog::ResourceJobManager;
use crate::app::errors::{AppError, AppResult};
use crate::app::types::{DataMovementProtocol, JobState, JobSubmissionProtocol, ServerInfo};

pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;
pub type ByteWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Result of a submission the scheduler accepted. `job_id` is `None` when the
/// output carried no recognizable id; callers verify by job name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutput {
    pub job_id: Option<String>,
    pub output: CommandOutput,
}

/// Uniform job and file contract over one compute or storage host.
#[async_trait]
pub trait RemoteCluster: Send + Sync {
    fn server_info(&self) -> &ServerInfo;

    async fn submit(&self, script_path: &str, work_dir: &str) -> AppResult<SubmissionOutput>;
    async fn copy_to(&self, local: &Path, remote: &str) -> AppResult<()>;
    async fn copy_from(&self, remote: &str, local: &Path) -> AppResult<()>;
    async fn make_directory(&self, path: &str) -> AppResult<()>;
    async fn list_directory(&self, path: &str) -> AppResult<Vec<String>>;
    /// Cancels the job and returns the status it had before the cancel.
    async fn cancel(&self, job_id: &str) -> AppResult<JobState>;
    async fn status(&self, job_id: &str) -> AppResult<JobState>;
    async fn job_id_by_name(&self, job_name: &str, user: &str) -> AppResult<Option<String>>;
    async fn statuses(
        &self,
        user: &str,
        job_ids: &[String],
    ) -> AppResult<HashMap<String, JobState>>;
    /// Runs a raw command; `true` when it exited zero with an empty stderr.
    async fn exec(&self, command: &str) -> AppResult<bool>;
    async fn remove_path(&self, path: &str) -> AppResult<()>;
    /// `None` when the path does not exist.
    async fn file_size(&self, path: &str) -> AppResult<Option<u64>>;
    async fn open_read(&self, path: &str) -> AppResult<ByteReader>;
    async fn open_write(&self, path: &str) -> AppResult<ByteWriter>;

    async fn write_file(&self, path: &str, contents: &[u8]) -> AppResult<()> {
        let mut writer = self.open_write(path).await?;
        writer
            .write_all(contents)
            .await
            .map_err(|err| AppError::transport(format!("write {path} failed: {err}")))?;
        writer
            .shutdown()
            .await
            .map_err(|err| AppError::transport(format!("close {path} failed: {err}")))?;
        Ok(())
    }
}

/// How a handle reaches its host: for job submission, or file-only for data
/// movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterAccess {
    Submission(JobSubmissionProtocol),
    Transfer(DataMovementProtocol),
}

impl ClusterAccess {
    pub fn is_local(self) -> bool {
        matches!(
            self,
            ClusterAccess::Submission(JobSubmissionProtocol::Local)
                | ClusterAccess::Transfer(DataMovementProtocol::Local)
        )
    }
}

impl fmt::Display for ClusterAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterAccess::Submission(protocol) => write!(f, "job submission protocol {protocol}"),
            ClusterAccess::Transfer(protocol) => write!(f, "data movement protocol {protocol}"),
        }
    }
}

/// What a cluster handle is built from; equal specs share one cached handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    pub resource_id: String,
    pub access: ClusterAccess,
    pub server: ServerInfo,
    pub gateway_id: String,
    pub job_manager: Option<ResourceJobManager>,
}

#[async_trait]
pub trait RemoteClusterFactory: Send + Sync {
    async fn cluster(&self, spec: &ClusterSpec) -> AppResult<Arc<dyn RemoteCluster>>;
}
