// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use thiserror::Error as ThisError;

use crate::app::errors::{AppError, AppErrorKind, codes};

#[derive(Debug, ThisError)]
pub enum SshError {
    #[error("ssh connect to {target} failed: {reason}")]
    Connect { target: String, reason: String },
    #[error("authentication_failure for {0}")]
    Authentication(String),
    #[error("unusable credential: {0}")]
    Credential(String),
    #[error("ssh channel error: {0}")]
    Channel(String),
    #[error("sftp error on {path}: {reason}")]
    Sftp { path: String, reason: String },
    #[error("no such remote path: {0}")]
    NotFound(String),
    #[error("local io error on {path}: {reason}")]
    LocalIo { path: String, reason: String },
}

impl SshError {
    /// Failures that a fresh session may cure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SshError::Connect { .. } | SshError::Channel(_) | SshError::Sftp { .. }
        )
    }
}

impl From<SshError> for AppError {
    fn from(err: SshError) -> Self {
        match err {
            SshError::Authentication(_) | SshError::Credential(_) => {
                AppError::remote_init(err.to_string())
            }
            SshError::NotFound(_) => {
                AppError::with_message(AppErrorKind::NotFound, codes::NOT_FOUND, err.to_string())
            }
            SshError::LocalIo { .. } => AppError::task(err.to_string()),
            SshError::Connect { .. } | SshError::Channel(_) | SshError::Sftp { .. } => {
                AppError::transport(err.to_string())
            }
        }
    }
}
