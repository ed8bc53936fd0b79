// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::{BTreeMap, HashMap};

use crate::app::catalog::ResourceJobManager;
use crate::app::errors::{AppError, AppResult};
use crate::app::services::parsers;
use crate::app::services::shell::sh_escape;
use crate::app::types::{JobState, ResourceJobManagerType};

pub const OVERRIDE_SUBMIT: &str = "submit";
pub const OVERRIDE_CANCEL: &str = "cancel";
pub const OVERRIDE_STATUS: &str = "status";
pub const OVERRIDE_JOB_ID_BY_NAME: &str = "job_id_by_name";
pub const OVERRIDE_BULK_STATUS: &str = "bulk_status";

/// Scheduler CLI templates for one job manager type, plus the output parser.
///
/// Overrides are full command templates with `{script}`, `{work_dir}`,
/// `{job_id}`, `{job_name}` and `{user}` placeholders; values are shell-escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobManager {
    kind: ResourceJobManagerType,
    bin_path: Option<String>,
    overrides: BTreeMap<String, String>,
}

impl JobManager {
    pub fn new(kind: ResourceJobManagerType) -> Self {
        Self {
            kind,
            bin_path: None,
            overrides: BTreeMap::new(),
        }
    }

    pub fn from_resource(resource: &ResourceJobManager) -> Self {
        Self {
            kind: resource.job_manager_type,
            bin_path: resource
                .job_manager_bin_path
                .as_deref()
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(str::to_string),
            overrides: resource.command_overrides.clone(),
        }
    }

    pub fn kind(&self) -> ResourceJobManagerType {
        self.kind
    }

    fn bin(&self, command: &str) -> String {
        match &self.bin_path {
            Some(dir) => format!("{}/{}", dir.trim_end_matches('/'), command),
            None => command.to_string(),
        }
    }

    fn render_override(&self, key: &str, values: &[(&str, &str)]) -> Option<String> {
        let template = self.overrides.get(key)?;
        let mut out = template.clone();
        for (name, value) in values {
            out = out.replace(&format!("{{{name}}}"), &sh_escape(value));
        }
        Some(out)
    }

    pub fn submit_command(&self, script_path: &str, work_dir: &str) -> String {
        if let Some(cmd) = self.render_override(
            OVERRIDE_SUBMIT,
            &[("script", script_path), ("work_dir", work_dir)],
        ) {
            return cmd;
        }
        let wd = sh_escape(work_dir);
        let script = sh_escape(script_path);
        match self.kind {
            ResourceJobManagerType::PBS | ResourceJobManagerType::UGE => {
                format!("cd {wd} && {} {script}", self.bin("qsub"))
            }
            ResourceJobManagerType::SLURM => format!("cd {wd} && {} {script}", self.bin("sbatch")),
            ResourceJobManagerType::LSF => format!("cd {wd} && {} < {script}", self.bin("bsub")),
            ResourceJobManagerType::FORK => {
                format!("cd {wd} && nohup /bin/sh {script} > /dev/null 2>&1 & echo $!")
            }
        }
    }

    pub fn cancel_command(&self, job_id: &str) -> String {
        if let Some(cmd) = self.render_override(OVERRIDE_CANCEL, &[("job_id", job_id)]) {
            return cmd;
        }
        let id = sh_escape(job_id);
        match self.kind {
            ResourceJobManagerType::PBS | ResourceJobManagerType::UGE => {
                format!("{} {id}", self.bin("qdel"))
            }
            ResourceJobManagerType::SLURM => format!("{} {id}", self.bin("scancel")),
            ResourceJobManagerType::LSF => format!("{} {id}", self.bin("bkill")),
            ResourceJobManagerType::FORK => format!("kill -TERM {id}"),
        }
    }

    pub fn status_command(&self, job_id: &str) -> String {
        if let Some(cmd) = self.render_override(OVERRIDE_STATUS, &[("job_id", job_id)]) {
            return cmd;
        }
        let id = sh_escape(job_id);
        match self.kind {
            ResourceJobManagerType::PBS => format!("{} -f {id}", self.bin("qstat")),
            ResourceJobManagerType::SLURM => format!("{} -h -j {id} -o %T", self.bin("squeue")),
            ResourceJobManagerType::LSF => {
                format!("{} -noheader -o stat {id}", self.bin("bjobs"))
            }
            ResourceJobManagerType::UGE => self.bin("qstat"),
            ResourceJobManagerType::FORK => format!("ps -o stat= -p {id}"),
        }
    }

    pub fn job_id_by_name_command(&self, job_name: &str, user: &str) -> String {
        if let Some(cmd) = self.render_override(
            OVERRIDE_JOB_ID_BY_NAME,
            &[("job_name", job_name), ("user", user)],
        ) {
            return cmd;
        }
        let name = sh_escape(job_name);
        let user = sh_escape(user);
        match self.kind {
            ResourceJobManagerType::PBS => format!("{} -u {user} -N {name}", self.bin("qselect")),
            ResourceJobManagerType::SLURM => {
                format!("{} -h -u {user} -n {name} -o %i", self.bin("squeue"))
            }
            ResourceJobManagerType::LSF => {
                format!("{} -noheader -o jobid -u {user} -J {name}", self.bin("bjobs"))
            }
            ResourceJobManagerType::UGE => format!("{} -u {user}", self.bin("qstat")),
            ResourceJobManagerType::FORK => format!("pgrep -u {user} -f {name}"),
        }
    }

    pub fn bulk_status_command(&self, user: &str) -> String {
        if let Some(cmd) = self.render_override(OVERRIDE_BULK_STATUS, &[("user", user)]) {
            return cmd;
        }
        let user = sh_escape(user);
        match self.kind {
            ResourceJobManagerType::PBS | ResourceJobManagerType::UGE => {
                format!("{} -u {user}", self.bin("qstat"))
            }
            ResourceJobManagerType::SLURM => {
                format!("{} -h -u {user} -o \"%i %T\"", self.bin("squeue"))
            }
            ResourceJobManagerType::LSF => {
                format!("{} -noheader -o \"jobid stat\" -u {user}", self.bin("bjobs"))
            }
            ResourceJobManagerType::FORK => format!("ps -u {user} -o pid=,stat="),
        }
    }

    /// Classifies submission output. A non-zero exit or a failure marker is a
    /// `SubmissionFailure` carrying both streams verbatim.
    pub fn classify_submission(
        &self,
        stdout: &str,
        stderr: &str,
        exit_code: i32,
    ) -> AppResult<Option<String>> {
        let combined = format!("{stdout}\n{stderr}");
        if exit_code != 0 || parsers::has_failure_marker(self.kind, &combined) {
            return Err(AppError::submission(format!(
                "submission failed (exit code {exit_code}); stdout: {stdout}; stderr: {stderr}"
            )));
        }
        Ok(parsers::parse_job_id(self.kind, &combined))
    }

    pub fn parse_status(&self, job_id: &str, output: &str) -> JobState {
        parsers::parse_job_state(self.kind, job_id, output)
    }

    pub fn parse_job_id_by_name(&self, job_name: &str, output: &str) -> Option<String> {
        parsers::parse_job_id_by_name(self.kind, job_name, output)
    }

    pub fn parse_bulk_status(&self, output: &str) -> HashMap<String, JobState> {
        parsers::parse_bulk_states(self.kind, output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_commands_per_manager() {
        let slurm = JobManager::new(ResourceJobManagerType::SLURM);
        assert_eq!(
            slurm.submit_command("/scratch/p1/job.slurm", "/scratch/p1"),
            "cd '/scratch/p1' && sbatch '/scratch/p1/job.slurm'"
        );
        let lsf = JobManager::new(ResourceJobManagerType::LSF);
        assert!(lsf.submit_command("job.lsf", "/w").contains("bsub < 'job.lsf'"));
        let fork = JobManager::new(ResourceJobManagerType::FORK);
        assert!(fork.submit_command("run.sh", "/w").ends_with("echo $!"));
    }

    #[test]
    fn bin_path_prefixes_scheduler_binaries() {
        let jm = JobManager::from_resource(&ResourceJobManager {
            job_manager_type: ResourceJobManagerType::PBS,
            job_manager_bin_path: Some("/opt/torque/bin/".into()),
            command_overrides: BTreeMap::new(),
        });
        assert_eq!(jm.cancel_command("12.srv"), "/opt/torque/bin/qdel '12.srv'");
    }

    #[test]
    fn overrides_replace_templates() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            OVERRIDE_CANCEL.to_string(),
            "scancel --signal=KILL {job_id}".to_string(),
        );
        let jm = JobManager::from_resource(&ResourceJobManager {
            job_manager_type: ResourceJobManagerType::SLURM,
            job_manager_bin_path: None,
            command_overrides: overrides,
        });
        assert_eq!(jm.cancel_command("77"), "scancel --signal=KILL '77'");
        assert_eq!(jm.status_command("77"), "squeue -h -j '77' -o %T");
    }

    #[test]
    fn zero_exit_with_failure_marker_is_submission_failure() {
        let jm = JobManager::new(ResourceJobManagerType::SLURM);
        let err = jm
            .classify_submission("", "sbatch: error: Batch job submission failed", 0)
            .unwrap_err();
        assert_eq!(
            err.kind(),
            crate::app::errors::AppErrorKind::SubmissionFailure
        );
        assert!(err.to_string().contains("Batch job submission failed"));
    }

    #[test]
    fn non_zero_exit_is_submission_failure_even_with_job_id() {
        let jm = JobManager::new(ResourceJobManagerType::SLURM);
        assert!(jm.classify_submission("Submitted batch job 5", "", 1).is_err());
    }

    #[test]
    fn clean_submission_returns_job_id() {
        let jm = JobManager::new(ResourceJobManagerType::SLURM);
        assert_eq!(
            jm.classify_submission("Submitted batch job 4242\n", "", 0)
                .unwrap(),
            Some("4242".to_string())
        );
        assert_eq!(jm.classify_submission("", "", 0).unwrap(), None);
    }
}
