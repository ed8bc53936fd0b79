// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::adapters::ssh::SshSessionProvider;
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ByteReader, ByteWriter, CommandOutput, RemoteCluster, SubmissionOutput};
use crate::app::services::managers::JobManager;
use crate::app::services::shell::{is_unsafe_cleanup_path, sh_escape};
use crate::app::types::{JobState, ServerInfo};

/// SSH-backed cluster. Every operation runs on a pooled session under the
/// provider's transport retry policy.
pub struct HpcCluster {
    server: ServerInfo,
    gateway_id: String,
    job_manager: Option<JobManager>,
    ssh: Arc<SshSessionProvider>,
}

impl HpcCluster {
    pub fn new(
        server: ServerInfo,
        gateway_id: String,
        job_manager: Option<JobManager>,
        ssh: Arc<SshSessionProvider>,
    ) -> Self {
        Self {
            server,
            gateway_id,
            job_manager,
            ssh,
        }
    }

    fn manager(&self) -> AppResult<&JobManager> {
        self.job_manager.as_ref().ok_or_else(|| {
            AppError::configuration(format!(
                "{} has no job manager; it only serves file transfers",
                self.server.host
            ))
        })
    }

    async fn capture(&self, op: &'static str, cmd: &str) -> AppResult<CommandOutput> {
        self.ssh
            .run(&self.server, &self.gateway_id, op, move |session| async move {
                session.exec_capture(cmd).await
            })
            .await
    }
}

#[async_trait]
impl RemoteCluster for HpcCluster {
    fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, script_path, work_dir),
        fields(op = "submit", host = %self.server.host, user = %self.server.login_user, port = self.server.port)
    )]
    async fn submit(&self, script_path: &str, work_dir: &str) -> AppResult<SubmissionOutput> {
        let manager = self.manager()?;
        let cmd = manager.submit_command(script_path, work_dir);
        let output = self.capture("submit", &cmd).await?;
        let job_id = manager.classify_submission(&output.stdout, &output.stderr, output.exit_code)?;
        Ok(SubmissionOutput { job_id, output })
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, local, remote),
        fields(op = "copy_to", host = %self.server.host, user = %self.server.login_user, port = self.server.port)
    )]
    async fn copy_to(&self, local: &Path, remote: &str) -> AppResult<()> {
        self.ssh
            .run(&self.server, &self.gateway_id, "copy_to", move |session| async move {
                session.upload_file(local, remote).await
            })
            .await
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, remote, local),
        fields(op = "copy_from", host = %self.server.host, user = %self.server.login_user, port = self.server.port)
    )]
    async fn copy_from(&self, remote: &str, local: &Path) -> AppResult<()> {
        self.ssh
            .run(&self.server, &self.gateway_id, "copy_from", move |session| async move {
                session.download_path(remote, local).await
            })
            .await
    }

    async fn make_directory(&self, path: &str) -> AppResult<()> {
        self.ssh
            .run(&self.server, &self.gateway_id, "make_directory", move |session| async move {
                session.ensure_remote_dir(path).await
            })
            .await
    }

    async fn list_directory(&self, path: &str) -> AppResult<Vec<String>> {
        self.ssh
            .run(&self.server, &self.gateway_id, "list_directory", move |session| async move {
                session.list_dir(path).await
            })
            .await
    }

    async fn cancel(&self, job_id: &str) -> AppResult<JobState> {
        let manager = self.manager()?;
        let status_cmd = manager.status_command(job_id);
        let cancel_cmd = manager.cancel_command(job_id);
        let (previous, output) = self
            .ssh
            .run(&self.server, &self.gateway_id, "cancel", |session| {
                let status_cmd = status_cmd.as_str();
                let cancel_cmd = cancel_cmd.as_str();
                async move {
                    let status = session.exec_capture(status_cmd).await?;
                    let previous = manager.parse_status(job_id, &status.combined());
                    let output = session.exec_capture(cancel_cmd).await?;
                    Ok((previous, output))
                }
            })
            .await?;
        if output.exit_code != 0 && !previous.is_terminal() {
            return Err(AppError::task(format!(
                "cancel of job {job_id} failed (exit code {}): {}",
                output.exit_code,
                output.combined().trim()
            )));
        }
        Ok(previous)
    }

    async fn status(&self, job_id: &str) -> AppResult<JobState> {
        let manager = self.manager()?;
        let output = self
            .capture("status", &manager.status_command(job_id))
            .await?;
        Ok(manager.parse_status(job_id, &output.combined()))
    }

    async fn job_id_by_name(&self, job_name: &str, user: &str) -> AppResult<Option<String>> {
        let manager = self.manager()?;
        let output = self
            .capture("job_id_by_name", &manager.job_id_by_name_command(job_name, user))
            .await?;
        Ok(manager.parse_job_id_by_name(job_name, &output.stdout))
    }

    async fn statuses(
        &self,
        user: &str,
        job_ids: &[String],
    ) -> AppResult<HashMap<String, JobState>> {
        let manager = self.manager()?;
        let output = self
            .capture("bulk_status", &manager.bulk_status_command(user))
            .await?;
        let known = manager.parse_bulk_status(&output.stdout);
        Ok(job_ids
            .iter()
            .map(|id| {
                let state = known.get(id).copied().unwrap_or(JobState::Unknown);
                (id.clone(), state)
            })
            .collect())
    }

    async fn exec(&self, command: &str) -> AppResult<bool> {
        let output = self.capture("exec", command).await?;
        if output.exit_code != 0 || !output.stderr.trim().is_empty() {
            tracing::debug!(
                exit_code = output.exit_code,
                stderr = %output.stderr.trim(),
                "remote command reported failure"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn remove_path(&self, path: &str) -> AppResult<()> {
        if is_unsafe_cleanup_path(path) {
            return Err(AppError::invalid_argument(format!(
                "refusing to remove unsafe path '{path}'"
            )));
        }
        let output = self
            .capture("remove", &format!("rm -rf -- {}", sh_escape(path)))
            .await?;
        if output.exit_code != 0 {
            return Err(AppError::task(format!(
                "failed to remove {path}: {}",
                output.combined().trim()
            )));
        }
        Ok(())
    }

    async fn file_size(&self, path: &str) -> AppResult<Option<u64>> {
        self.ssh
            .run(&self.server, &self.gateway_id, "file_size", move |session| async move {
                session.file_size(path).await
            })
            .await
    }

    async fn open_read(&self, path: &str) -> AppResult<ByteReader> {
        let file = self
            .ssh
            .run(&self.server, &self.gateway_id, "open_read", move |session| async move {
                session.open_remote_read(path).await
            })
            .await?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &str) -> AppResult<ByteWriter> {
        let file = self
            .ssh
            .run(&self.server, &self.gateway_id, "open_write", move |session| async move {
                session.open_remote_write(path).await
            })
            .await?;
        Ok(Box::new(file))
    }
}
