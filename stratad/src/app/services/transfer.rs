// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use tokio::io::AsyncWriteExt;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::RemoteCluster;

/// Streams one file between two hosts without staging it on local disk.
///
/// Returns the number of bytes moved. An empty source is an error unless
/// `ignore_empty` is set, in which case nothing is written and `0` is returned.
pub async fn third_party_copy(
    source: &dyn RemoteCluster,
    source_path: &str,
    destination: &dyn RemoteCluster,
    destination_path: &str,
    ignore_empty: bool,
) -> AppResult<u64> {
    let size = source.file_size(source_path).await?.ok_or_else(|| {
        AppError::with_message(
            AppErrorKind::NotFound,
            codes::NOT_FOUND,
            format!(
                "{source_path} does not exist on {}",
                source.server_info().host
            ),
        )
    })?;
    if size == 0 {
        if ignore_empty {
            tracing::debug!(source_path, "skipping empty source file");
            return Ok(0);
        }
        return Err(AppError::with_message(
            AppErrorKind::TaskFailure,
            codes::EMPTY_SOURCE,
            format!(
                "{source_path} on {} is empty",
                source.server_info().host
            ),
        ));
    }

    tracing::debug!(
        source = %source.server_info().host,
        source_path,
        destination = %destination.server_info().host,
        destination_path,
        "streaming file between hosts"
    );
    let mut reader = source.open_read(source_path).await?;
    let mut writer = destination.open_write(destination_path).await?;
    let copied = tokio::io::copy(&mut reader, &mut writer)
        .await
        .map_err(|err| {
            AppError::transport(format!(
                "stream {source_path} -> {destination_path} failed: {err}"
            ))
        })?;
    writer.shutdown().await.map_err(|err| {
        AppError::transport(format!("close {destination_path} failed: {err}"))
    })?;
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::FakeCluster;

    #[tokio::test]
    async fn streams_between_hosts() {
        let storage = FakeCluster::new("storage");
        let compute = FakeCluster::new("compute");
        storage.put_file("/data/in.dat", b"0123456789");
        let copied = third_party_copy(
            &storage,
            "/data/in.dat",
            &compute,
            "/scratch/p1/in.dat",
            false,
        )
        .await
        .expect("copy");
        assert_eq!(copied, 10);
        assert_eq!(
            compute.file("/scratch/p1/in.dat").as_deref(),
            Some(&b"0123456789"[..])
        );
    }

    #[tokio::test]
    async fn empty_source_fails_unless_ignored() {
        let storage = FakeCluster::new("storage");
        let compute = FakeCluster::new("compute");
        storage.put_file("/data/empty", b"");
        let err = third_party_copy(
            &storage,
            "/data/empty",
            &compute,
            "/scratch/empty",
            false,
        )
        .await
        .expect_err("empty source");
        assert_eq!(err.code(), codes::EMPTY_SOURCE);

        let copied = third_party_copy(
            &storage,
            "/data/empty",
            &compute,
            "/scratch/empty",
            true,
        )
        .await
        .expect("ignored");
        assert_eq!(copied, 0);
        assert!(compute.file("/scratch/empty").is_none());
    }

    #[tokio::test]
    async fn read_failure_surfaces_without_writing() {
        let storage = FakeCluster::new("storage");
        let compute = FakeCluster::new("compute");
        storage.put_file("/data/in.dat", b"abc");
        *storage.read_transport_failures.lock().expect("lock") = 2;
        let err = third_party_copy(
            &storage,
            "/data/in.dat",
            &compute,
            "/scratch/in.dat",
            false,
        )
        .await
        .expect_err("read fails");
        assert!(err.is_transport());
        assert!(compute.file("/scratch/in.dat").is_none());
        assert_eq!(*storage.read_transport_failures.lock().expect("lock"), 1);
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let storage = FakeCluster::new("storage");
        let compute = FakeCluster::new("compute");
        let err = third_party_copy(
            &storage,
            "/data/missing",
            &compute,
            "/scratch/missing",
            false,
        )
        .await
        .expect_err("missing");
        assert_eq!(err.kind(), AppErrorKind::NotFound);
    }
}
