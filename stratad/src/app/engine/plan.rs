// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::OffsetDateTime;

use crate::app::engine::context::ProcessContext;
use crate::app::errors::AppResult;
use crate::app::services::ids::{job_name, new_id};
use crate::app::services::shell::{file_name, join_remote};
use crate::app::services::uri;
use crate::app::types::{DataType, StageKind, TaskModel, TaskPayload};

pub const ARCHIVE_SUFFIX: &str = ".tar.gz";

fn task(process_id: &str, payload: TaskPayload, now: OffsetDateTime) -> TaskModel {
    TaskModel {
        task_id: new_id("TASK"),
        parent_process_id: process_id.to_string(),
        payload,
        creation_time: now,
    }
}

/// Remote location an output is produced at.
fn output_source(ctx: &ProcessContext, data_type: DataType, name: &str, value: Option<&str>) -> String {
    match data_type {
        DataType::Stdout => ctx.stdout_path.clone(),
        DataType::Stderr => ctx.stderr_path.clone(),
        _ => {
            let value = value.map(str::trim).filter(|v| !v.is_empty()).unwrap_or(name);
            if value.starts_with('/') {
                value.to_string()
            } else {
                join_remote(&ctx.output_dir, value)
            }
        }
    }
}

/// Flat task order for a process that has none yet: workspace setup, input
/// staging, submission, monitoring, output staging, archive, cleanup.
pub fn plan_tasks(ctx: &ProcessContext, now: OffsetDateTime) -> AppResult<Vec<TaskModel>> {
    let process_id = ctx.process_id();
    let mut tasks = vec![task(
        process_id,
        TaskPayload::EnvSetup {
            location: ctx.working_dir.clone(),
        },
        now,
    )];

    let mut inputs: Vec<_> = ctx.process.inputs.iter().collect();
    inputs.sort_by_key(|input| input.order);
    for input in inputs {
        let Some(value) = input.value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
            continue;
        };
        let destination = match input.data_type {
            DataType::Uri => join_remote(&ctx.input_dir, file_name(&uri::parse(value)?.path)),
            DataType::UriCollection => ctx.input_dir.clone(),
            _ => continue,
        };
        tasks.push(task(
            process_id,
            TaskPayload::DataStaging {
                source: value.to_string(),
                destination,
                stage_kind: StageKind::Input,
                input_name: Some(input.name.clone()),
                output_name: None,
            },
            now,
        ));
    }

    tasks.push(task(
        process_id,
        TaskPayload::JobSubmission {
            job_name: job_name(process_id),
        },
        now,
    ));
    tasks.push(task(
        process_id,
        TaskPayload::Monitoring {
            mode: ctx.monitor_mode(),
        },
        now,
    ));

    for output in ctx.process.outputs.iter().filter(|o| o.data_movement) {
        if !matches!(
            output.data_type,
            DataType::Uri | DataType::UriCollection | DataType::Stdout | DataType::Stderr
        ) {
            continue;
        }
        let source = output_source(ctx, output.data_type, &output.name, output.value.as_deref());
        let destination = ctx.output_destination(file_name(&source));
        tasks.push(task(
            process_id,
            TaskPayload::DataStaging {
                source,
                destination,
                stage_kind: StageKind::Output,
                input_name: None,
                output_name: Some(output.name.clone()),
            },
            now,
        ));
    }

    if ctx.process.archive || ctx.interface.archive_working_directory {
        tasks.push(task(
            process_id,
            TaskPayload::DataStaging {
                source: ctx.working_dir.clone(),
                destination: ctx.output_destination(&format!("{process_id}{ARCHIVE_SUFFIX}")),
                stage_kind: StageKind::ArchiveOutput,
                input_name: None,
                output_name: None,
            },
            now,
        ));
    }

    if ctx.process.cleanup_scratch {
        tasks.push(task(
            process_id,
            TaskPayload::EnvCleanup {
                location: ctx.working_dir.clone(),
            },
            now,
        ));
    }
    Ok(tasks)
}
