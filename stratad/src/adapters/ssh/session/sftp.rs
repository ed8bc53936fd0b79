// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::fs::File as SftpFile;
use russh_sftp::protocol::{FileAttributes, StatusCode};
use std::path::{Path, PathBuf};
use tokio::fs as tokiofs;
use tokio::io::AsyncWriteExt;

use crate::adapters::ssh::SshError;

use super::SshSession;

fn sftp_err(path: &str, err: SftpError) -> SshError {
    if is_missing_path(&err) {
        return SshError::NotFound(path.to_string());
    }
    SshError::Sftp {
        path: path.to_string(),
        reason: err.to_string(),
    }
}

fn local_err(path: &Path, err: std::io::Error) -> SshError {
    SshError::LocalIo {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn is_missing_path(err: &SftpError) -> bool {
    matches!(
        err,
        SftpError::Status(status) if status.status_code == StatusCode::NoSuchFile
    )
}

fn is_permission_denied(err: &SftpError) -> bool {
    match err {
        SftpError::Status(status) => status.status_code == StatusCode::PermissionDenied,
        SftpError::IO(msg) => msg.to_lowercase().contains("permission denied"),
        _ => false,
    }
}

/// Every prefix of `remote_dir`, shortest first. Absolute paths keep their root.
pub(crate) fn build_remote_dir_paths(remote_dir: &str) -> Vec<String> {
    let absolute = remote_dir.starts_with('/');
    let mut paths = Vec::new();
    let mut cur = String::new();
    for seg in remote_dir.split('/') {
        if seg.is_empty() || seg == "." || seg == ".." {
            continue;
        }
        if cur.is_empty() {
            cur = if absolute {
                format!("/{seg}")
            } else {
                seg.to_string()
            };
        } else {
            cur = format!("{cur}/{seg}");
        }
        paths.push(cur.clone());
    }
    paths
}

impl SshSession {
    async fn sftp(&self) -> Result<SftpSession, SshError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|err| SshError::Channel(format!("open sftp channel: {err}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|err| SshError::Channel(format!("request sftp subsystem: {err}")))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|err| SshError::Channel(format!("sftp handshake: {err}")))
    }

    pub async fn ensure_remote_dir(&self, remote_dir: &str) -> Result<(), SshError> {
        let sftp = self.sftp().await?;
        for cur in build_remote_dir_paths(remote_dir) {
            match sftp.metadata(&cur).await {
                Ok(meta) => {
                    if !meta.is_dir() {
                        return Err(SshError::Sftp {
                            path: cur,
                            reason: "remote path exists but is not a directory".to_string(),
                        });
                    }
                }
                Err(e) => {
                    log::debug!("creating remote directory {cur} ({e})");
                    sftp.create_dir(&cur).await.map_err(|err| sftp_err(&cur, err))?;
                    let attrs = FileAttributes {
                        permissions: Some(0o700),
                        ..Default::default()
                    };
                    if let Err(e) = sftp.set_metadata(&cur, attrs).await {
                        if is_permission_denied(&e) {
                            log::debug!("permission denied when setting metadata for {cur}: {e}");
                        } else {
                            log::warn!("error when setting metadata for {cur}: {e}");
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<(), SshError> {
        log::debug!(
            "uploading {} -> {}:{}",
            local_path.display(),
            self.target,
            remote_path
        );
        let sftp = self.sftp().await?;
        let mut lf = tokiofs::File::open(local_path)
            .await
            .map_err(|err| local_err(local_path, err))?;
        let mut rfile = sftp
            .create(remote_path)
            .await
            .map_err(|err| sftp_err(remote_path, err))?;
        tokio::io::copy(&mut lf, &mut rfile)
            .await
            .map_err(|err| SshError::Sftp {
                path: remote_path.to_string(),
                reason: err.to_string(),
            })?;
        rfile.shutdown().await.map_err(|err| SshError::Sftp {
            path: remote_path.to_string(),
            reason: err.to_string(),
        })?;
        Ok(())
    }

    /// Downloads a file, or a directory tree when `remote_path` is a directory.
    pub async fn download_path(&self, remote_path: &str, local_path: &Path) -> Result<(), SshError> {
        let sftp = self.sftp().await?;
        let meta = sftp
            .metadata(remote_path)
            .await
            .map_err(|err| sftp_err(remote_path, err))?;
        if meta.is_dir() {
            download_dir(&sftp, remote_path, local_path).await
        } else {
            download_file(&sftp, remote_path, local_path).await
        }
    }

    pub async fn list_dir(&self, remote_dir: &str) -> Result<Vec<String>, SshError> {
        let sftp = self.sftp().await?;
        let entries = sftp
            .read_dir(remote_dir)
            .await
            .map_err(|err| sftp_err(remote_dir, err))?;
        let mut names: Vec<String> = entries
            .map(|entry| entry.file_name())
            .filter(|name| name != "." && name != "..")
            .collect();
        names.sort();
        Ok(names)
    }

    pub async fn file_size(&self, remote_path: &str) -> Result<Option<u64>, SshError> {
        let sftp = self.sftp().await?;
        match sftp.metadata(remote_path).await {
            Ok(meta) => Ok(Some(meta.size.unwrap_or(0))),
            Err(err) if is_missing_path(&err) => Ok(None),
            Err(err) => Err(sftp_err(remote_path, err)),
        }
    }

    pub async fn open_remote_read(&self, remote_path: &str) -> Result<SftpFile, SshError> {
        let sftp = self.sftp().await?;
        sftp.open(remote_path)
            .await
            .map_err(|err| sftp_err(remote_path, err))
    }

    pub async fn open_remote_write(&self, remote_path: &str) -> Result<SftpFile, SshError> {
        let sftp = self.sftp().await?;
        sftp.create(remote_path)
            .await
            .map_err(|err| sftp_err(remote_path, err))
    }
}

async fn download_file(
    sftp: &SftpSession,
    remote_path: &str,
    local_path: &Path,
) -> Result<(), SshError> {
    if let Some(parent) = local_path.parent() {
        tokiofs::create_dir_all(parent)
            .await
            .map_err(|err| local_err(parent, err))?;
    }
    let mut rfile = sftp
        .open(remote_path)
        .await
        .map_err(|err| sftp_err(remote_path, err))?;
    let mut lfile = tokiofs::File::create(local_path)
        .await
        .map_err(|err| local_err(local_path, err))?;
    tokio::io::copy(&mut rfile, &mut lfile)
        .await
        .map_err(|err| SshError::Sftp {
            path: remote_path.to_string(),
            reason: err.to_string(),
        })?;
    lfile
        .flush()
        .await
        .map_err(|err| local_err(local_path, err))?;
    Ok(())
}

async fn download_dir(
    sftp: &SftpSession,
    remote_dir: &str,
    local_dir: &Path,
) -> Result<(), SshError> {
    let mut stack: Vec<(String, PathBuf)> = vec![(
        remote_dir.trim_end_matches('/').to_string(),
        local_dir.to_path_buf(),
    )];

    while let Some((remote_base, local_base)) = stack.pop() {
        tokiofs::create_dir_all(&local_base)
            .await
            .map_err(|err| local_err(&local_base, err))?;
        let entries = sftp
            .read_dir(&remote_base)
            .await
            .map_err(|err| sftp_err(&remote_base, err))?;
        for entry in entries {
            let name = entry.file_name();
            if name == "." || name == ".." {
                continue;
            }
            let remote_child = format!("{}/{}", remote_base, name);
            let local_child = local_base.join(&name);
            if entry.metadata().is_dir() {
                stack.push((remote_child, local_child));
            } else {
                download_file(sftp, &remote_child, &local_child).await?;
            }
        }
    }
    Ok(())
}
