// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::future::Future;

use crate::app::errors::AppResult;

pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Bounded retry of transport failures. Application-level results, including
/// commands that ran and failed, are returned on the first attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
        }
    }

    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transport() && attempt < self.attempts => {
                    tracing::warn!(
                        op = op_name,
                        attempt,
                        max_attempts = self.attempts,
                        error = %err,
                        "transport failure, retrying"
                    );
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_transport() {
                        tracing::error!(op = op_name, attempts = attempt, error = %err, "giving up");
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn two_failures_then_success_is_success() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::default()
            .run("exec", |_| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(AppError::transport("connection reset"))
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result.expect("third attempt succeeds"), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn persistent_failure_stops_after_three_attempts() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = RetryPolicy::default()
            .run("copy_to", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::transport("connection reset"))
            })
            .await;
        assert!(result.expect_err("fails").is_transport());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn application_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = RetryPolicy::default()
            .run("submit", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::submission("qsub: Unknown queue"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let result: AppResult<()> = RetryPolicy::new(0)
            .run("exec", |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::transport("connection reset"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
