// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs as tokiofs;
use tokio::process::Command;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ByteReader, ByteWriter, CommandOutput, RemoteCluster, SubmissionOutput};
use crate::app::services::managers::JobManager;
use crate::app::services::shell::is_unsafe_cleanup_path;
use crate::app::types::{JobState, ResourceJobManagerType, ServerInfo};

/// Runs jobs and file operations on the daemon's own host.
pub struct LocalCluster {
    server: ServerInfo,
    job_manager: JobManager,
}

fn io_err(action: &str, path: &Path, err: std::io::Error) -> AppError {
    AppError::task(format!("{action} {} failed: {err}", path.display()))
}

async fn ensure_parent(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokiofs::create_dir_all(parent)
            .await
            .map_err(|err| io_err("create", parent, err))?;
    }
    Ok(())
}

/// Copies a file, or a directory tree when `src` is a directory.
async fn copy_tree(src: &Path, dst: &Path) -> AppResult<()> {
    let meta = tokiofs::metadata(src)
        .await
        .map_err(|err| io_err("stat", src, err))?;
    if !meta.is_dir() {
        ensure_parent(dst).await?;
        tokiofs::copy(src, dst)
            .await
            .map_err(|err| io_err("copy", src, err))?;
        return Ok(());
    }
    let mut stack: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = stack.pop() {
        tokiofs::create_dir_all(&to)
            .await
            .map_err(|err| io_err("create", &to, err))?;
        let mut entries = tokiofs::read_dir(&from)
            .await
            .map_err(|err| io_err("list", &from, err))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| io_err("list", &from, err))?
        {
            let child_from = entry.path();
            let child_to = to.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|err| io_err("stat", &child_from, err))?;
            if file_type.is_dir() {
                stack.push((child_from, child_to));
            } else {
                tokiofs::copy(&child_from, &child_to)
                    .await
                    .map_err(|err| io_err("copy", &child_from, err))?;
            }
        }
    }
    Ok(())
}

impl LocalCluster {
    pub fn new(server: ServerInfo, job_manager: Option<JobManager>) -> Self {
        Self {
            server,
            job_manager: job_manager.unwrap_or_else(|| JobManager::new(ResourceJobManagerType::FORK)),
        }
    }

    async fn run(&self, cmd: &str) -> AppResult<CommandOutput> {
        tracing::debug!(command = cmd, "running local command");
        let output = Command::new("/bin/sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .map_err(|err| AppError::task(format!("failed to spawn '{cmd}': {err}")))?;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[async_trait]
impl RemoteCluster for LocalCluster {
    fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    async fn submit(&self, script_path: &str, work_dir: &str) -> AppResult<SubmissionOutput> {
        let output = self
            .run(&self.job_manager.submit_command(script_path, work_dir))
            .await?;
        let job_id = self.job_manager.classify_submission(
            &output.stdout,
            &output.stderr,
            output.exit_code,
        )?;
        Ok(SubmissionOutput { job_id, output })
    }

    async fn copy_to(&self, local: &Path, remote: &str) -> AppResult<()> {
        copy_tree(local, Path::new(remote)).await
    }

    async fn copy_from(&self, remote: &str, local: &Path) -> AppResult<()> {
        copy_tree(Path::new(remote), local).await
    }

    async fn make_directory(&self, path: &str) -> AppResult<()> {
        tokiofs::create_dir_all(path)
            .await
            .map_err(|err| io_err("create", Path::new(path), err))
    }

    async fn list_directory(&self, path: &str) -> AppResult<Vec<String>> {
        let mut entries = tokiofs::read_dir(path)
            .await
            .map_err(|err| io_err("list", Path::new(path), err))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| io_err("list", Path::new(path), err))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn cancel(&self, job_id: &str) -> AppResult<JobState> {
        let previous = self.status(job_id).await?;
        let output = self.run(&self.job_manager.cancel_command(job_id)).await?;
        if output.exit_code != 0 && !previous.is_terminal() {
            return Err(AppError::task(format!(
                "cancel of job {job_id} failed: {}",
                output.combined().trim()
            )));
        }
        Ok(previous)
    }

    async fn status(&self, job_id: &str) -> AppResult<JobState> {
        let output = self.run(&self.job_manager.status_command(job_id)).await?;
        Ok(self.job_manager.parse_status(job_id, &output.combined()))
    }

    async fn job_id_by_name(&self, job_name: &str, user: &str) -> AppResult<Option<String>> {
        let output = self
            .run(&self.job_manager.job_id_by_name_command(job_name, user))
            .await?;
        Ok(self
            .job_manager
            .parse_job_id_by_name(job_name, &output.stdout))
    }

    async fn statuses(
        &self,
        user: &str,
        job_ids: &[String],
    ) -> AppResult<HashMap<String, JobState>> {
        let output = self
            .run(&self.job_manager.bulk_status_command(user))
            .await?;
        let known = self.job_manager.parse_bulk_status(&output.stdout);
        Ok(job_ids
            .iter()
            .map(|id| (id.clone(), known.get(id).copied().unwrap_or(JobState::Unknown)))
            .collect())
    }

    async fn exec(&self, command: &str) -> AppResult<bool> {
        let output = self.run(command).await?;
        Ok(output.exit_code == 0 && output.stderr.trim().is_empty())
    }

    async fn remove_path(&self, path: &str) -> AppResult<()> {
        if is_unsafe_cleanup_path(path) {
            return Err(AppError::invalid_argument(format!(
                "refusing to remove unsafe path '{path}'"
            )));
        }
        let target = Path::new(path);
        let result = match tokiofs::symlink_metadata(target).await {
            Ok(meta) if meta.is_dir() => tokiofs::remove_dir_all(target).await,
            Ok(_) => tokiofs::remove_file(target).await,
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        };
        result.map_err(|err| io_err("remove", target, err))
    }

    async fn file_size(&self, path: &str) -> AppResult<Option<u64>> {
        match tokiofs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err("stat", Path::new(path), err)),
        }
    }

    async fn open_read(&self, path: &str) -> AppResult<ByteReader> {
        let file = tokiofs::File::open(path)
            .await
            .map_err(|err| io_err("open", Path::new(path), err))?;
        Ok(Box::new(file))
    }

    async fn open_write(&self, path: &str) -> AppResult<ByteWriter> {
        ensure_parent(Path::new(path)).await?;
        let file = tokiofs::File::create(path)
            .await
            .map_err(|err| io_err("create", Path::new(path), err))?;
        Ok(Box::new(file))
    }
}
