// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::app::engine::ProcessContext;
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::RemoteCluster;
use crate::app::runtime::Runtime;
use crate::app::services::shell::{file_name, join_remote, sh_escape};
use crate::app::services::transfer::third_party_copy;
use crate::app::services::uri::{self, UriScheme};
use crate::app::tasks::{
    Task, compute_cluster, compute_transfer_cluster, payload_mismatch, storage_cluster,
};
use crate::app::types::{DataType, StageKind, TaskModel, TaskPayload, TaskType};

/// One side of a transfer.
enum Endpoint {
    Local(PathBuf),
    Remote {
        cluster: Arc<dyn RemoteCluster>,
        path: String,
    },
}

impl Endpoint {
    fn describe(&self) -> String {
        match self {
            Endpoint::Local(path) => format!("local:{}", path.display()),
            Endpoint::Remote { cluster, path } => format!("{}:{path}", cluster.server_info().host),
        }
    }
}

/// Moves inputs onto the compute host and outputs off it. Storage to compute
/// transfers stream between hosts; local files go through copy_to/copy_from.
pub struct DataStagingTask;

/// Resolves the non-compute side of a staging URI. Bare paths live on the
/// storage resource when the process has one, on local disk otherwise.
async fn endpoint(rt: &Runtime, ctx: &ProcessContext, raw: &str) -> AppResult<Endpoint> {
    let parsed = uri::parse(raw)?;
    match parsed.scheme {
        UriScheme::File => Ok(Endpoint::Local(PathBuf::from(parsed.path))),
        UriScheme::Bare if ctx.storage.is_none() => Ok(Endpoint::Local(PathBuf::from(parsed.path))),
        UriScheme::Bare => Ok(Endpoint::Remote {
            cluster: storage_cluster(rt, ctx).await?,
            path: parsed.path,
        }),
        UriScheme::Ssh => {
            let host = parsed.host.as_deref().unwrap_or_default();
            let cluster = if ctx
                .storage
                .as_ref()
                .is_some_and(|storage| storage.resource.host_name == host)
            {
                storage_cluster(rt, ctx).await?
            } else if host == ctx.compute_host() {
                compute_transfer_cluster(rt, ctx).await?
            } else {
                return Err(AppError::configuration(format!(
                    "{host} is neither the storage nor the compute resource of process {}",
                    ctx.process_id()
                )));
            };
            Ok(Endpoint::Remote {
                cluster,
                path: parsed.path,
            })
        }
    }
}

fn not_found(what: &str) -> AppError {
    AppError::with_message(AppErrorKind::NotFound, codes::NOT_FOUND, format!("{what} does not exist"))
}

async fn transfer(
    rt: &Runtime,
    from: &Endpoint,
    to: &Endpoint,
    ignore_empty: bool,
) -> AppResult<()> {
    tracing::debug!(from = %from.describe(), to = %to.describe(), "staging file");
    match (from, to) {
        (Endpoint::Local(local), Endpoint::Remote { cluster, path }) => {
            if !local.exists() {
                return Err(not_found(&local.display().to_string()));
            }
            cluster.copy_to(local, path).await
        }
        (Endpoint::Remote { cluster, path }, Endpoint::Local(local)) => {
            create_parent(local).await?;
            cluster.copy_from(path, local).await
        }
        (
            Endpoint::Remote {
                cluster: source,
                path: source_path,
            },
            Endpoint::Remote {
                cluster: destination,
                path: destination_path,
            },
        ) => third_party_copy(
            source.as_ref(),
            source_path,
            destination.as_ref(),
            destination_path,
            ignore_empty,
        )
        .await
        .map(|_| ()),
        (Endpoint::Local(source), Endpoint::Local(destination)) => {
            create_parent(destination).await?;
            tokio::fs::copy(source, destination)
                .await
                .map(|_| ())
                .map_err(|err| match err.kind() {
                    std::io::ErrorKind::NotFound => not_found(&source.display().to_string()),
                    _ => AppError::task(format!("copy {} failed: {err}", source.display())),
                })
        }
    }
}

async fn create_parent(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| AppError::task(format!("create {} failed: {err}", parent.display())))?;
    }
    Ok(())
}

impl DataStagingTask {
    async fn stage_input(
        &self,
        rt: &Runtime,
        ctx: &mut ProcessContext,
        source: &str,
        destination: &str,
        input_name: Option<&str>,
    ) -> AppResult<()> {
        let compute = compute_transfer_cluster(rt, ctx).await?;
        let index = input_name.and_then(|name| {
            ctx.process
                .inputs
                .iter()
                .position(|input| input.name == name)
        });
        let is_collection =
            index.is_some_and(|i| ctx.process.inputs[i].data_type == DataType::UriCollection);
        if !is_collection {
            let from = endpoint(rt, ctx, source).await?;
            let to = Endpoint::Remote {
                cluster: compute,
                path: destination.to_string(),
            };
            return transfer(rt, &from, &to, false).await;
        }

        let Some(index) = index else {
            return Ok(());
        };
        let original = ctx.process.inputs[index].value.clone();
        let mut first_err = None;
        for element in source.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            ctx.process.inputs[index].value = Some(element.to_string());
            let result = async {
                let from = endpoint(rt, ctx, element).await?;
                let path = match &from {
                    Endpoint::Local(path) => path.display().to_string(),
                    Endpoint::Remote { path, .. } => path.clone(),
                };
                let to = Endpoint::Remote {
                    cluster: compute.clone(),
                    path: join_remote(destination, file_name(&path)),
                };
                transfer(rt, &from, &to, false).await
            }
            .await;
            if let Err(err) = result {
                tracing::warn!(element, error = %err, "collection element failed to stage");
                first_err.get_or_insert(err);
            }
        }
        ctx.process.inputs[index].value = original;
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn stage_output(
        &self,
        rt: &Runtime,
        ctx: &mut ProcessContext,
        source: &str,
        destination: &str,
        output_name: Option<&str>,
    ) -> AppResult<()> {
        let index = output_name.and_then(|name| {
            ctx.process
                .outputs
                .iter()
                .position(|output| output.name == name)
        });
        let required = index.is_some_and(|i| ctx.process.outputs[i].is_required);
        let from = Endpoint::Remote {
            cluster: compute_transfer_cluster(rt, ctx).await?,
            path: source.to_string(),
        };
        let to = endpoint(rt, ctx, destination).await?;
        match transfer(rt, &from, &to, !required).await {
            Ok(()) => {}
            Err(err) if !required && err.kind() == AppErrorKind::NotFound => {
                tracing::info!(source, output = ?output_name, "optional output missing; skipped");
                return Ok(());
            }
            Err(err) => return Err(err),
        }
        if let Some(index) = index {
            ctx.process.outputs[index].value = Some(destination.to_string());
            rt.registry.upsert_process(&ctx.process).await?;
        }
        Ok(())
    }

    async fn archive(
        &self,
        rt: &Runtime,
        ctx: &mut ProcessContext,
        source: &str,
        destination: &str,
    ) -> AppResult<()> {
        let compute = compute_cluster(rt, ctx).await?;
        let archive_name = file_name(destination).to_string();
        let archive_path = join_remote(source, &archive_name);
        let command = format!(
            "cd {} && tar -czf {} --exclude={} .",
            sh_escape(source),
            sh_escape(&archive_path),
            sh_escape(&archive_name)
        );
        let ok = compute.exec(&command).await?;
        if !ok {
            return Err(AppError::task(format!(
                "archiving {source} on {} failed",
                ctx.compute_host()
            )));
        }
        let from = Endpoint::Remote {
            cluster: compute_transfer_cluster(rt, ctx).await?,
            path: archive_path,
        };
        let to = endpoint(rt, ctx, destination).await?;
        transfer(rt, &from, &to, false).await
    }
}

#[async_trait]
impl Task for DataStagingTask {
    #[tracing::instrument(skip_all, fields(process_id = %ctx.process_id(), task_id = %task.task_id))]
    async fn execute(
        &self,
        rt: &Runtime,
        ctx: &mut ProcessContext,
        task: &TaskModel,
    ) -> AppResult<()> {
        let TaskPayload::DataStaging {
            source,
            destination,
            stage_kind,
            input_name,
            output_name,
        } = &task.payload
        else {
            return Err(payload_mismatch(task, TaskType::DataStaging));
        };
        match stage_kind {
            StageKind::Input => {
                self.stage_input(rt, ctx, source, destination, input_name.as_deref())
                    .await
            }
            StageKind::Output => {
                self.stage_output(rt, ctx, source, destination, output_name.as_deref())
                    .await
            }
            StageKind::ArchiveOutput => self.archive(rt, ctx, source, destination).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::engine::Engine;
    use crate::app::ports::RegistryPort;
    use crate::app::testing::{self, Harness, STORAGE_HOST};
    use crate::app::types::{InputDataObject, OutputDataObject};

    fn staging(source: &str, destination: &str, kind: StageKind, name: &str) -> TaskModel {
        let (input_name, output_name) = match kind {
            StageKind::Input => (Some(name.to_string()), None),
            _ => (None, Some(name.to_string())),
        };
        TaskModel {
            task_id: "TASK_stage".into(),
            parent_process_id: "P1".into(),
            payload: TaskPayload::DataStaging {
                source: source.into(),
                destination: destination.into(),
                stage_kind: kind,
                input_name,
                output_name,
            },
            creation_time: time::OffsetDateTime::now_utc(),
        }
    }

    async fn context(h: &Harness, process: crate::app::types::ProcessModel) -> ProcessContext {
        testing::seed_process(&h.store, &process).await;
        Engine::new(h.runtime.clone())
            .populate_context(&process.process_id, "gw", "tok")
            .await
            .expect("ctx")
    }

    #[tokio::test]
    async fn collection_value_is_restored_after_partial_failure() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a"), b"A").expect("a");
        std::fs::write(dir.path().join("c"), b"C").expect("c");
        let value = format!(
            "{0}/a,{0}/b,{0}/c",
            dir.path().display()
        );
        let mut process = testing::process("P1");
        process.inputs.push(InputDataObject {
            name: "frames".into(),
            value: Some(value.clone()),
            data_type: DataType::UriCollection,
            ..Default::default()
        });
        let mut ctx = context(&h, process).await;

        let err = DataStagingTask
            .execute(
                &h.runtime,
                &mut ctx,
                &staging(&value, "/scratch/alice/P1", StageKind::Input, "frames"),
            )
            .await
            .expect_err("b is missing");
        assert_eq!(err.kind(), AppErrorKind::NotFound);
        let restored = ctx
            .process
            .inputs
            .iter()
            .find(|input| input.name == "frames")
            .and_then(|input| input.value.clone());
        assert_eq!(restored, Some(value));
        let compute = h.compute();
        assert_eq!(compute.file("/scratch/alice/P1/a"), Some(b"A".to_vec()));
        assert_eq!(compute.file("/scratch/alice/P1/c"), Some(b"C".to_vec()));
    }

    #[tokio::test]
    async fn storage_inputs_stream_between_hosts() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        testing::seed_storage(&h.store).await;
        let storage = h.clusters.host(STORAGE_HOST);
        storage.put_file("/var/gw/in.pdb", b"ATOM");
        let source = format!("scp://gwuser@{STORAGE_HOST}:22/var/gw/in.pdb");
        let mut process = testing::process("P1");
        process.inputs.push(InputDataObject {
            name: "structure".into(),
            value: Some(source.clone()),
            data_type: DataType::Uri,
            ..Default::default()
        });
        let mut ctx = context(&h, process).await;

        DataStagingTask
            .execute(
                &h.runtime,
                &mut ctx,
                &staging(&source, "/scratch/alice/P1/in.pdb", StageKind::Input, "structure"),
            )
            .await
            .expect("staged");
        assert_eq!(h.compute().file("/scratch/alice/P1/in.pdb"), Some(b"ATOM".to_vec()));
    }

    #[tokio::test]
    async fn missing_outputs_fail_only_when_required() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        let mut process = testing::process("P1");
        process.outputs.push(OutputDataObject {
            name: "summary".into(),
            value: Some("summary.txt".into()),
            data_type: DataType::Uri,
            is_required: true,
            ..Default::default()
        });
        let mut ctx = context(&h, process).await;
        let local = ctx.output_destination("echo.stdout");

        DataStagingTask
            .execute(
                &h.runtime,
                &mut ctx,
                &staging("/scratch/alice/P1/echo.stdout", &local, StageKind::Output, "stdout"),
            )
            .await
            .expect("optional output skipped");

        let local = ctx.output_destination("summary.txt");
        let err = DataStagingTask
            .execute(
                &h.runtime,
                &mut ctx,
                &staging("/scratch/alice/P1/summary.txt", &local, StageKind::Output, "summary"),
            )
            .await
            .expect_err("required output");
        assert_eq!(err.kind(), AppErrorKind::NotFound);
    }

    #[tokio::test]
    async fn staged_output_value_points_at_the_destination() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        testing::seed_storage(&h.store).await;
        let mut ctx = context(&h, testing::process("P1")).await;
        h.compute().put_file("/scratch/alice/P1/echo.stdout", b"hello");
        let destination = ctx.output_destination("echo.stdout");
        assert_eq!(
            destination,
            format!("scp://gwuser@{STORAGE_HOST}:22/var/gw/alice/EXP_P1/echo.stdout")
        );

        DataStagingTask
            .execute(
                &h.runtime,
                &mut ctx,
                &staging("/scratch/alice/P1/echo.stdout", &destination, StageKind::Output, "stdout"),
            )
            .await
            .expect("staged");
        assert_eq!(
            h.clusters
                .host(STORAGE_HOST)
                .file("/var/gw/alice/EXP_P1/echo.stdout"),
            Some(b"hello".to_vec())
        );
        let stored = h.store.get_process("P1").await.expect("get").expect("present");
        assert_eq!(stored.outputs[0].value.as_deref(), Some(destination.as_str()));
    }

    #[tokio::test]
    async fn archive_tars_the_working_directory_then_moves_it() {
        let h = testing::harness().await;
        testing::seed_catalog(&h.store).await;
        let mut ctx = context(&h, testing::process("P1")).await;
        // the fake exec does not run tar; the archive appears as if it had
        h.compute().put_file("/scratch/alice/P1/P1.tar.gz", b"tgz");
        let destination = ctx.output_destination("P1.tar.gz");

        DataStagingTask
            .execute(
                &h.runtime,
                &mut ctx,
                &TaskModel {
                    task_id: "TASK_archive".into(),
                    parent_process_id: "P1".into(),
                    payload: TaskPayload::DataStaging {
                        source: "/scratch/alice/P1".into(),
                        destination,
                        stage_kind: StageKind::ArchiveOutput,
                        input_name: None,
                        output_name: None,
                    },
                    creation_time: time::OffsetDateTime::now_utc(),
                },
            )
            .await
            .expect("archived");
        let execs = h.compute().calls_starting_with("exec:");
        assert_eq!(execs.len(), 1);
        assert!(execs[0].contains("tar -czf"));
        assert!(ctx.local_working_dir.join("P1.tar.gz").is_file());
    }
}
