// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::app::types::JobState;

#[derive(Parser, Debug)]
#[command(
    name = "stratad",
    version,
    about = "Process execution engine for science gateways",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < STRATA_CONFIG_PATH < --config.\n\
If --config is omitted, stratad tries STRATA_CONFIG_PATH, then the default config file location; a missing default config is OK.\n\
Paths in the config file are resolved relative to the config file directory; paths passed as flags are resolved relative to the current working directory."
)]
pub struct Opts {
    #[arg(
        short,
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, stratad uses STRATA_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Path to the SQLite database file. Overrides `database_path` from the config file."
    )]
    pub database_path: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the daemon: consume launches, drive processes, monitor jobs.
    Serve(ServeArgs),
    /// Enqueue a LAUNCH message for a registered process.
    Launch(ProcessArgs),
    /// Mark a process for cancellation and enqueue a CANCEL message.
    Cancel(ProcessArgs),
    /// Deliver a job state change to the notification monitor.
    Notify {
        job_id: String,
        #[arg(value_parser = parse_job_state)]
        state: JobState,
    },
    /// Load catalog documents and process records from a JSON bundle.
    Import { file: PathBuf },
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(
        long,
        value_name = "PATH",
        help = "Root of the per-process local working directories. Overrides `local_data_location`."
    )]
    pub local_data_location: Option<PathBuf>,
    #[arg(
        long,
        value_name = "N",
        help = "Maximum number of processes driven concurrently. Overrides `max_workers`."
    )]
    pub max_workers: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct ProcessArgs {
    pub process_id: String,
    #[arg(long)]
    pub experiment: String,
    #[arg(long)]
    pub gateway: String,
    #[arg(long, help = "Credential token the process runs with.")]
    pub token: String,
}

fn parse_job_state(raw: &str) -> Result<JobState, String> {
    raw.parse()
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

pub fn parse_opts() -> ParsedOpts {
    let opts = Opts::parse();
    let verbose_override = opts.verbose.then_some(true);
    ParsedOpts {
        opts,
        verbose_override,
    }
}
