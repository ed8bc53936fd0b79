// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::types::{ExperimentState, ProcessState, StageKind, TaskModel, TaskPayload};

/// Process state a task moves the process into when it starts.
pub fn state_for_task(task: &TaskModel) -> ProcessState {
    match &task.payload {
        TaskPayload::EnvSetup { .. } => ProcessState::ConfiguringWorkspace,
        TaskPayload::DataStaging {
            stage_kind: StageKind::Input,
            ..
        } => ProcessState::InputDataStaging,
        TaskPayload::DataStaging { .. } => ProcessState::OutputDataStaging,
        TaskPayload::JobSubmission { .. } => ProcessState::Executing,
        TaskPayload::Monitoring { .. } | TaskPayload::OutputFetching { .. } => {
            ProcessState::Monitoring
        }
        TaskPayload::EnvCleanup { .. } => ProcessState::PostProcessing,
    }
}

/// Experiment-level view of a process state; `None` leaves the experiment as is.
pub fn experiment_state_for(state: ProcessState) -> Option<ExperimentState> {
    match state {
        ProcessState::Created | ProcessState::Validated => None,
        ProcessState::Started => Some(ExperimentState::Launched),
        ProcessState::PreProcessing
        | ProcessState::ConfiguringWorkspace
        | ProcessState::InputDataStaging
        | ProcessState::Executing
        | ProcessState::Monitoring
        | ProcessState::OutputDataStaging
        | ProcessState::PostProcessing => Some(ExperimentState::Executing),
        ProcessState::Completed => Some(ExperimentState::Completed),
        ProcessState::Cancelling => Some(ExperimentState::Cancelling),
        ProcessState::Canceled => Some(ExperimentState::Canceled),
        ProcessState::Failed => Some(ExperimentState::Failed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn task(payload: TaskPayload) -> TaskModel {
        TaskModel {
            task_id: "T".into(),
            parent_process_id: "P".into(),
            payload,
            creation_time: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn staging_direction_picks_the_state() {
        let input = task(TaskPayload::DataStaging {
            source: "a".into(),
            destination: "b".into(),
            stage_kind: StageKind::Input,
            input_name: None,
            output_name: None,
        });
        let archive = task(TaskPayload::DataStaging {
            source: "a".into(),
            destination: "b".into(),
            stage_kind: StageKind::ArchiveOutput,
            input_name: None,
            output_name: None,
        });
        assert_eq!(state_for_task(&input), ProcessState::InputDataStaging);
        assert_eq!(state_for_task(&archive), ProcessState::OutputDataStaging);
        assert_eq!(
            state_for_task(&task(TaskPayload::EnvCleanup {
                location: "/scratch/x/P".into()
            })),
            ProcessState::PostProcessing
        );
    }

    #[test]
    fn experiment_follows_process() {
        assert_eq!(experiment_state_for(ProcessState::Created), None);
        assert_eq!(
            experiment_state_for(ProcessState::Monitoring),
            Some(ExperimentState::Executing)
        );
        assert_eq!(
            experiment_state_for(ProcessState::Canceled),
            Some(ExperimentState::Canceled)
        );
    }
}
