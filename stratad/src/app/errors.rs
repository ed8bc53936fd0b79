// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const CONNECTION_FAILURE: &str = "connection_failure";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const INVALID_STATE: &str = "invalid_state";
    pub const NOT_FOUND: &str = "not_found";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const CATALOG_ACCESS: &str = "catalog_access_error";
    pub const REMOTE_INIT: &str = "remote_init_error";
    pub const SUBMISSION_FAILURE: &str = "submission_failure";
    pub const TASK_FAILURE: &str = "task_failure";
    pub const CONFIGURATION: &str = "configuration_error";
    pub const EMPTY_SOURCE: &str = "empty_source";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    InvalidArgument,
    InvalidState,
    NotFound,
    /// Registry or catalog records are missing or unreadable.
    CatalogAccess,
    /// Remote cluster or credential construction failed.
    RemoteInit,
    /// Connection-level failure; the only kind the transport retry loop retries.
    Transport,
    SubmissionFailure,
    TaskFailure,
    Configuration,
    Internal,
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn is_transport(&self) -> bool {
        self.kind == AppErrorKind::Transport
    }

    pub fn catalog(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::CatalogAccess, codes::CATALOG_ACCESS, message)
    }

    pub fn remote_init(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::RemoteInit, codes::REMOTE_INIT, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Transport, codes::CONNECTION_FAILURE, message)
    }

    pub fn submission(message: impl Into<String>) -> Self {
        Self::with_message(
            AppErrorKind::SubmissionFailure,
            codes::SUBMISSION_FAILURE,
            message,
        )
    }

    pub fn task(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::TaskFailure, codes::TASK_FAILURE, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::InvalidState, codes::INVALID_STATE, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_message(
            AppErrorKind::InvalidArgument,
            codes::INVALID_ARGUMENT,
            message,
        )
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Configuration, codes::CONFIGURATION, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Internal, codes::INTERNAL_ERROR, message)
    }

    /// Short text suitable for gateway users. Technical detail stays in `Display`.
    pub fn user_message(&self) -> String {
        match self.kind {
            AppErrorKind::CatalogAccess => {
                "Could not read the application or resource configuration for this process."
                    .to_string()
            }
            AppErrorKind::RemoteInit => {
                "Could not connect to the compute resource with the configured credentials."
                    .to_string()
            }
            AppErrorKind::Transport => {
                "Lost connection to the compute resource while running the process.".to_string()
            }
            AppErrorKind::SubmissionFailure => {
                "The job could not be submitted to the compute resource.".to_string()
            }
            AppErrorKind::TaskFailure => format!("A process step failed: {}", self.message),
            AppErrorKind::Configuration => {
                format!("The process is misconfigured: {}", self.message)
            }
            _ => "Internal error while running the process.".to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_the_technical_message() {
        let err = AppError::submission("sbatch: error: invalid partition");
        assert_eq!(err.to_string(), "sbatch: error: invalid partition");
        assert_eq!(err.kind(), AppErrorKind::SubmissionFailure);
        assert_eq!(err.code(), codes::SUBMISSION_FAILURE);
    }

    #[test]
    fn user_message_hides_transport_detail() {
        let err = AppError::transport("channel open failed: broken pipe");
        assert!(err.is_transport());
        assert!(!err.user_message().contains("broken pipe"));
    }
}
