// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use adapters::cli::Command;

mod adapters;
mod app;
mod commands;
mod config;
mod logging;

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => tracing::info!(
            path = %path.display(),
            source = source.as_str(),
            present = report.config_file_present,
            "config path"
        ),
        (Some(path), None) => tracing::info!(
            path = %path.display(),
            present = report.config_file_present,
            "config path"
        ),
        (None, _) => tracing::info!("config path: (none)"),
    }
    for entry in &report.entries {
        tracing::info!(
            key = entry.key,
            value = %entry.value,
            source = entry.source.as_str(),
            "config"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let (local_data_location, max_workers) = match &opts.command {
        Command::Serve(args) => (args.local_data_location.clone(), args.max_workers),
        _ => (None, None),
    };
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            database_path: opts.database_path,
            local_data_location,
            max_workers,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);

    match opts.command {
        Command::Serve(_) => {
            log_config_report(&report);
            commands::serve(config).await?;
        }
        Command::Launch(args) => {
            let store = commands::open_store(&config).await?;
            let process_id = args.process_id.clone();
            let tag = commands::launch(&store, args).await?;
            tracing::info!(process_id = %process_id, delivery_tag = tag, "launch enqueued");
        }
        Command::Cancel(args) => {
            let store = commands::open_store(&config).await?;
            let process_id = args.process_id.clone();
            let tag = commands::cancel(&store, args).await?;
            tracing::info!(process_id = %process_id, delivery_tag = tag, "cancel enqueued");
        }
        Command::Notify { job_id, state } => {
            let store = commands::open_store(&config).await?;
            commands::notify(&store, &job_id, state).await?;
            tracing::info!(job_id = %job_id, state = %state, "notification recorded");
        }
        Command::Import { file } => {
            let store = commands::open_store(&config).await?;
            let summary = commands::import(&store, &file).await?;
            tracing::info!(
                documents = summary.documents,
                processes = summary.processes,
                "import finished"
            );
        }
    }
    Ok(())
}
