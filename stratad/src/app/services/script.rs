// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::catalog::Parallelism;
use crate::app::services::shell::sh_escape;
use crate::app::types::ResourceJobManagerType;

/// Everything needed to render a batch script for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobDescriptor {
    pub job_name: String,
    pub working_dir: String,
    pub stdout_path: String,
    pub stderr_path: String,
    pub queue: Option<String>,
    pub node_count: Option<u32>,
    pub cpu_count: Option<u32>,
    pub wall_time_minutes: Option<u32>,
    pub memory_mb: Option<u32>,
    pub allocation: Option<String>,
    pub parallelism: Parallelism,
    pub module_loads: Vec<String>,
    pub environment: Vec<(String, String)>,
    pub pre_job_commands: Vec<String>,
    pub executable: String,
    pub arguments: Vec<String>,
    pub post_job_commands: Vec<String>,
}

pub fn script_file_name(kind: ResourceJobManagerType) -> &'static str {
    match kind {
        ResourceJobManagerType::PBS => "job.pbs",
        ResourceJobManagerType::SLURM => "job.slurm",
        ResourceJobManagerType::LSF => "job.lsf",
        ResourceJobManagerType::UGE => "job.uge",
        ResourceJobManagerType::FORK => "job.sh",
    }
}

fn walltime(minutes: u32) -> String {
    format!("{:02}:{:02}:00", minutes / 60, minutes % 60)
}

fn directives(kind: ResourceJobManagerType, job: &JobDescriptor) -> Vec<String> {
    let mut lines = Vec::new();
    match kind {
        ResourceJobManagerType::SLURM => {
            lines.push(format!("#SBATCH --job-name={}", job.job_name));
            if let Some(queue) = &job.queue {
                lines.push(format!("#SBATCH --partition={queue}"));
            }
            if let Some(nodes) = job.node_count {
                lines.push(format!("#SBATCH --nodes={nodes}"));
            }
            if let Some(cpus) = job.cpu_count {
                lines.push(format!("#SBATCH --ntasks={cpus}"));
            }
            if let Some(minutes) = job.wall_time_minutes {
                lines.push(format!("#SBATCH --time={}", walltime(minutes)));
            }
            if let Some(mem) = job.memory_mb {
                lines.push(format!("#SBATCH --mem={mem}M"));
            }
            if let Some(account) = &job.allocation {
                lines.push(format!("#SBATCH --account={account}"));
            }
            lines.push(format!("#SBATCH --output={}", job.stdout_path));
            lines.push(format!("#SBATCH --error={}", job.stderr_path));
        }
        ResourceJobManagerType::PBS => {
            lines.push(format!("#PBS -N {}", job.job_name));
            if let Some(queue) = &job.queue {
                lines.push(format!("#PBS -q {queue}"));
            }
            let nodes = job.node_count.unwrap_or(1);
            match job.cpu_count {
                Some(cpus) => {
                    let ppn = cpus.div_ceil(nodes.max(1));
                    lines.push(format!("#PBS -l nodes={nodes}:ppn={ppn}"));
                }
                None => lines.push(format!("#PBS -l nodes={nodes}")),
            }
            if let Some(minutes) = job.wall_time_minutes {
                lines.push(format!("#PBS -l walltime={}", walltime(minutes)));
            }
            if let Some(mem) = job.memory_mb {
                lines.push(format!("#PBS -l mem={mem}mb"));
            }
            if let Some(account) = &job.allocation {
                lines.push(format!("#PBS -A {account}"));
            }
            lines.push(format!("#PBS -o {}", job.stdout_path));
            lines.push(format!("#PBS -e {}", job.stderr_path));
        }
        ResourceJobManagerType::LSF => {
            lines.push(format!("#BSUB -J {}", job.job_name));
            if let Some(queue) = &job.queue {
                lines.push(format!("#BSUB -q {queue}"));
            }
            if let Some(cpus) = job.cpu_count {
                lines.push(format!("#BSUB -n {cpus}"));
            }
            if let Some(minutes) = job.wall_time_minutes {
                lines.push(format!("#BSUB -W {:02}:{:02}", minutes / 60, minutes % 60));
            }
            if let Some(mem) = job.memory_mb {
                lines.push(format!("#BSUB -M {mem}"));
            }
            if let Some(account) = &job.allocation {
                lines.push(format!("#BSUB -P {account}"));
            }
            lines.push(format!("#BSUB -cwd {}", job.working_dir));
            lines.push(format!("#BSUB -o {}", job.stdout_path));
            lines.push(format!("#BSUB -e {}", job.stderr_path));
        }
        ResourceJobManagerType::UGE => {
            lines.push(format!("#$ -N {}", job.job_name));
            if let Some(queue) = &job.queue {
                lines.push(format!("#$ -q {queue}"));
            }
            if let Some(cpus) = job.cpu_count {
                lines.push(format!("#$ -pe mpi {cpus}"));
            }
            if let Some(minutes) = job.wall_time_minutes {
                lines.push(format!("#$ -l h_rt={}", walltime(minutes)));
            }
            if let Some(mem) = job.memory_mb {
                lines.push(format!("#$ -l h_vmem={mem}M"));
            }
            if let Some(account) = &job.allocation {
                lines.push(format!("#$ -A {account}"));
            }
            lines.push("#$ -cwd".to_string());
            lines.push(format!("#$ -o {}", job.stdout_path));
            lines.push(format!("#$ -e {}", job.stderr_path));
        }
        ResourceJobManagerType::FORK => {}
    }
    lines
}

fn command_line(kind: ResourceJobManagerType, job: &JobDescriptor) -> String {
    let mut parts = Vec::new();
    match job.parallelism {
        Parallelism::Mpi | Parallelism::OpenMpMpi => {
            parts.push(format!("mpirun -np {}", job.cpu_count.unwrap_or(1)));
        }
        Parallelism::Serial | Parallelism::OpenMp => {}
    }
    parts.push(job.executable.clone());
    parts.extend(job.arguments.iter().map(|arg| sh_escape(arg)));
    let mut line = parts.join(" ");
    if kind == ResourceJobManagerType::FORK {
        line.push_str(&format!(
            " > {} 2> {}",
            sh_escape(&job.stdout_path),
            sh_escape(&job.stderr_path)
        ));
    }
    line
}

pub fn render(kind: ResourceJobManagerType, job: &JobDescriptor) -> String {
    let mut lines = vec!["#!/bin/bash".to_string()];
    lines.extend(directives(kind, job));
    lines.push(String::new());
    lines.push(format!("cd {}", sh_escape(&job.working_dir)));
    lines.extend(job.module_loads.iter().cloned());
    for (name, value) in &job.environment {
        lines.push(format!("export {name}={value}"));
    }
    if matches!(job.parallelism, Parallelism::OpenMp | Parallelism::OpenMpMpi) {
        lines.push(format!(
            "export OMP_NUM_THREADS={}",
            job.cpu_count.unwrap_or(1)
        ));
    }
    lines.extend(job.pre_job_commands.iter().cloned());
    lines.push(command_line(kind, job));
    lines.extend(job.post_job_commands.iter().cloned());
    let mut script = lines.join("\n");
    script.push('\n');
    script
}
