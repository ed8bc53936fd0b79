// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;

use crate::app::types::{JobState, ResourceJobManagerType};

const GENERIC_FAILURE_MARKERS: &[&str] = &[
    "submission failed",
    "permission denied",
    "access denied",
    "not submitted",
    "job rejected",
];

fn manager_failure_markers(kind: ResourceJobManagerType) -> &'static [&'static str] {
    match kind {
        ResourceJobManagerType::SLURM => &["sbatch: error:", "unable to allocate resources"],
        ResourceJobManagerType::PBS => &["qsub: ", "unknown queue", "illegal attribute"],
        ResourceJobManagerType::LSF => &["request aborted", "bad resource requirement"],
        ResourceJobManagerType::UGE => &["unable to run job", "error:"],
        ResourceJobManagerType::FORK => &["no such file or directory"],
    }
}

pub fn has_failure_marker(kind: ResourceJobManagerType, output: &str) -> bool {
    let lowered = output.to_ascii_lowercase();
    GENERIC_FAILURE_MARKERS
        .iter()
        .chain(manager_failure_markers(kind))
        .any(|marker| lowered.contains(marker))
}

fn is_digits(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

/// Digits immediately following `prefix`, optionally wrapped in `<...>`.
fn digits_after(output: &str, prefix: &str) -> Option<String> {
    let start = output.find(prefix)? + prefix.len();
    let digits: String = output[start..]
        .trim_start_matches(['<', ' '])
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() { None } else { Some(digits) }
}

pub fn parse_job_id(kind: ResourceJobManagerType, output: &str) -> Option<String> {
    match kind {
        ResourceJobManagerType::SLURM => digits_after(output, "Submitted batch job"),
        ResourceJobManagerType::LSF => digits_after(output, "Job <"),
        ResourceJobManagerType::UGE => digits_after(output, "Your job"),
        ResourceJobManagerType::PBS => output
            .lines()
            .map(str::trim)
            .find(|line| {
                let head = line.split('.').next().unwrap_or_default();
                is_digits(head) && !line.contains(char::is_whitespace)
            })
            .map(str::to_string),
        ResourceJobManagerType::FORK => output
            .lines()
            .map(str::trim)
            .find(|line| is_digits(line))
            .map(str::to_string),
    }
}

fn slurm_state(raw: &str) -> JobState {
    let upper = raw.trim().to_ascii_uppercase();
    match upper.as_str() {
        "PENDING" | "PD" | "CONFIGURING" | "CF" | "REQUEUED" => JobState::Queued,
        "RUNNING" | "R" | "COMPLETING" | "CG" => JobState::Active,
        "SUSPENDED" | "S" | "STOPPED" | "ST" => JobState::Suspended,
        "COMPLETED" | "CD" => JobState::Complete,
        "FAILED" | "F" | "TIMEOUT" | "TO" | "NODE_FAIL" | "NF" | "OUT_OF_MEMORY" | "OOM"
        | "BOOT_FAIL" | "BF" | "DEADLINE" | "DL" | "PREEMPTED" | "PR" => JobState::Failed,
        other if other.starts_with("CANCELLED") || other == "CA" => JobState::Canceled,
        _ => JobState::Unknown,
    }
}

fn pbs_state(code: &str) -> JobState {
    match code.trim() {
        "Q" | "W" | "T" => JobState::Queued,
        "R" | "E" | "B" => JobState::Active,
        "H" | "S" | "U" => JobState::Suspended,
        "C" | "F" | "X" => JobState::Complete,
        _ => JobState::Unknown,
    }
}

fn lsf_state(code: &str) -> JobState {
    match code.trim().to_ascii_uppercase().as_str() {
        "PEND" | "WAIT" => JobState::Queued,
        "RUN" => JobState::Active,
        "PSUSP" | "USUSP" | "SSUSP" => JobState::Suspended,
        "DONE" => JobState::Complete,
        "EXIT" | "ZOMBI" => JobState::Failed,
        _ => JobState::Unknown,
    }
}

fn uge_state(code: &str) -> JobState {
    let code = code.trim();
    if code.starts_with('d') {
        return JobState::Canceled;
    }
    if code.contains('E') {
        return JobState::Failed;
    }
    if code.contains('s') || code.contains('S') || code.contains('T') {
        return JobState::Suspended;
    }
    if code.contains('r') || code.contains('t') {
        return JobState::Active;
    }
    if code.contains("qw") {
        return JobState::Queued;
    }
    JobState::Unknown
}

fn fork_state(code: &str) -> JobState {
    let code = code.trim();
    if code.is_empty() {
        JobState::Complete
    } else if code.starts_with('T') {
        JobState::Suspended
    } else if code.starts_with('Z') {
        JobState::Complete
    } else {
        JobState::Active
    }
}

/// Table rows of `qstat -u` (PBS) or `qstat` (UGE) keyed by job id.
fn table_rows(kind: ResourceJobManagerType, output: &str) -> Vec<(String, String, JobState)> {
    output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let id = *tokens.first()?;
            if !id.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                return None;
            }
            match kind {
                ResourceJobManagerType::PBS if tokens.len() >= 3 => Some((
                    id.to_string(),
                    tokens.get(3).copied().unwrap_or_default().to_string(),
                    pbs_state(tokens[tokens.len() - 2]),
                )),
                ResourceJobManagerType::UGE if tokens.len() >= 5 => Some((
                    id.to_string(),
                    tokens[2].to_string(),
                    uge_state(tokens[4]),
                )),
                _ => None,
            }
        })
        .collect()
}

/// Parses status output for a single job. Output without the job usually means
/// the scheduler has already forgotten it; that is reported as `Unknown`.
pub fn parse_job_state(kind: ResourceJobManagerType, job_id: &str, output: &str) -> JobState {
    match kind {
        ResourceJobManagerType::SLURM => output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.contains("error"))
            .map(slurm_state)
            .unwrap_or(JobState::Unknown),
        ResourceJobManagerType::PBS => output
            .lines()
            .filter_map(|line| line.trim().strip_prefix("job_state"))
            .filter_map(|rest| rest.trim().strip_prefix('='))
            .map(pbs_state)
            .next()
            .unwrap_or(JobState::Unknown),
        ResourceJobManagerType::LSF => output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(lsf_state)
            .unwrap_or(JobState::Unknown),
        ResourceJobManagerType::UGE => table_rows(kind, output)
            .into_iter()
            .find(|(id, _, _)| id == job_id)
            .map(|(_, _, state)| state)
            .unwrap_or(JobState::Unknown),
        ResourceJobManagerType::FORK => fork_state(output.lines().next().unwrap_or_default()),
    }
}

pub fn parse_job_id_by_name(
    kind: ResourceJobManagerType,
    job_name: &str,
    output: &str,
) -> Option<String> {
    match kind {
        ResourceJobManagerType::UGE => table_rows(kind, output)
            .into_iter()
            .find(|(_, name, _)| job_name.starts_with(name.as_str()) && !name.is_empty())
            .map(|(id, _, _)| id),
        _ => output
            .lines()
            .map(str::trim)
            .find(|line| {
                let head = line.split('.').next().unwrap_or_default();
                is_digits(head)
            })
            .map(str::to_string),
    }
}

pub fn parse_bulk_states(kind: ResourceJobManagerType, output: &str) -> HashMap<String, JobState> {
    match kind {
        ResourceJobManagerType::PBS | ResourceJobManagerType::UGE => table_rows(kind, output)
            .into_iter()
            .map(|(id, _, state)| (id, state))
            .collect(),
        ResourceJobManagerType::SLURM
        | ResourceJobManagerType::LSF
        | ResourceJobManagerType::FORK => output
            .lines()
            .filter_map(|line| {
                let mut tokens = line.split_whitespace();
                let id = tokens.next()?;
                let code = tokens.next()?;
                if !is_digits(id) {
                    return None;
                }
                let state = match kind {
                    ResourceJobManagerType::SLURM => slurm_state(code),
                    ResourceJobManagerType::LSF => lsf_state(code),
                    _ => fork_state(code),
                };
                Some((id.to_string(), state))
            })
            .collect(),
    }
}
