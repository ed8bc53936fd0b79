// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

const APP_DIR_NAME: &str = "strata";
const CONFIG_FILE_NAME: &str = "stratad.toml";
const CONFIG_ENV_VAR: &str = "STRATA_CONFIG_PATH";
const DATABASE_FILE_NAME: &str = "stratad.sqlite";
const PROCESS_DIR_NAME: &str = "processes";
const CREDENTIAL_DIR_NAME: &str = "credentials";
const DEFAULT_SESSION_IDLE_SECS: u64 = 300;
const DEFAULT_SSH_KEEPALIVE_SECS: u64 = 30;
const DEFAULT_TRANSPORT_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_WORKERS: usize = 8;
const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_MONITOR_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_VERIFICATION_DELAY_SECS: u64 = 5;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    database_path: Option<String>,
    local_data_location: Option<String>,
    credential_dir: Option<String>,
    known_hosts_path: Option<String>,
    strict_host_key_checking: Option<bool>,
    session_idle_secs: Option<u64>,
    ssh_keepalive_secs: Option<u64>,
    transport_attempts: Option<u32>,
    max_workers: Option<usize>,
    queue_poll_interval_ms: Option<u64>,
    monitor_poll_interval_secs: Option<u64>,
    verification_delay_secs: Option<u64>,
    verbose: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub local_data_location: PathBuf,
    pub credential_dir: PathBuf,
    /// `None` disables host-key verification entirely.
    pub known_hosts_path: Option<PathBuf>,
    pub strict_host_key_checking: bool,
    pub session_idle_secs: u64,
    pub ssh_keepalive_secs: u64,
    pub transport_attempts: u32,
    pub max_workers: usize,
    pub queue_poll_interval_ms: u64,
    pub monitor_poll_interval_secs: u64,
    pub verification_delay_secs: u64,
    pub verbose: bool,
}

impl Config {
    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    pub fn monitor_poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_poll_interval_secs)
    }

    pub fn verification_delay(&self) -> Duration {
        Duration::from_secs(self.verification_delay_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

/// One resolved key, rendered for the startup log.
#[derive(Debug)]
pub struct ReportEntry {
    pub key: &'static str,
    pub value: String,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub entries: Vec<ReportEntry>,
}

impl ConfigReport {
    fn record(&mut self, key: &'static str, value: impl std::fmt::Debug, source: ConfigSource) {
        self.entries.push(ReportEntry {
            key,
            value: format!("{value:?}"),
            source,
        });
    }
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

/// Values taken from command-line flags.
#[derive(Debug, Default)]
pub struct Overrides {
    pub database_path: Option<PathBuf>,
    pub local_data_location: Option<PathBuf>,
    pub max_workers: Option<usize>,
    pub verbose: Option<bool>,
}

#[cfg_attr(not(test), allow(dead_code))]
pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

fn pick<T>(flag: Option<T>, file: Option<T>, default: impl FnOnce() -> T) -> (T, ConfigSource) {
    match (flag, file) {
        (Some(value), _) => (value, ConfigSource::Override),
        (None, Some(value)) => (value, ConfigSource::ConfigFile),
        (None, None) => (default(), ConfigSource::Default),
    }
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());
    let mut report = ConfigReport {
        config_path: config_path.clone(),
        config_path_source,
        config_file_present,
        entries: Vec::new(),
    };

    let file_path = |raw: Option<String>| raw.map(|raw| resolve_path(&raw, base_dir));

    let (database_path, source) = match overrides.database_path {
        Some(path) => (expand_path(path), ConfigSource::Override),
        None => match file_path(file.database_path) {
            Some(path) => (path, ConfigSource::ConfigFile),
            None => (
                default_data_dir()
                    .map(|dir| dir.join(DATABASE_FILE_NAME))
                    .context("failed to resolve default database path; specify --database-path or set database_path in the config file")?,
                ConfigSource::Default,
            ),
        },
    };
    report.record("database_path", &database_path, source);

    let (local_data_location, source) = match overrides.local_data_location {
        Some(path) => (expand_path(path), ConfigSource::Override),
        None => match file_path(file.local_data_location) {
            Some(path) => (path, ConfigSource::ConfigFile),
            None => (
                default_data_dir()
                    .map(|dir| dir.join(PROCESS_DIR_NAME))
                    .context("failed to resolve default local data location; set local_data_location in the config file")?,
                ConfigSource::Default,
            ),
        },
    };
    report.record("local_data_location", &local_data_location, source);

    let (credential_dir, source) = match file_path(file.credential_dir) {
        Some(path) => (path, ConfigSource::ConfigFile),
        None => (
            default_config_dir()
                .map(|dir| dir.join(CREDENTIAL_DIR_NAME))
                .context("failed to resolve default credential directory; set credential_dir in the config file")?,
            ConfigSource::Default,
        ),
    };
    report.record("credential_dir", &credential_dir, source);

    let (known_hosts_path, source) = pick(None, file_path(file.known_hosts_path).map(Some), || {
        dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts"))
    });
    report.record("known_hosts_path", &known_hosts_path, source);

    let (strict_host_key_checking, source) = pick(None, file.strict_host_key_checking, || false);
    report.record("strict_host_key_checking", strict_host_key_checking, source);
    if strict_host_key_checking && known_hosts_path.is_none() {
        anyhow::bail!("strict_host_key_checking requires known_hosts_path");
    }

    let (session_idle_secs, source) =
        pick(None, file.session_idle_secs, || DEFAULT_SESSION_IDLE_SECS);
    report.record("session_idle_secs", session_idle_secs, source);

    let (ssh_keepalive_secs, source) =
        pick(None, file.ssh_keepalive_secs, || DEFAULT_SSH_KEEPALIVE_SECS);
    report.record("ssh_keepalive_secs", ssh_keepalive_secs, source);

    let (transport_attempts, source) =
        pick(None, file.transport_attempts, || DEFAULT_TRANSPORT_ATTEMPTS);
    if transport_attempts == 0 {
        anyhow::bail!("transport_attempts must be at least 1");
    }
    report.record("transport_attempts", transport_attempts, source);

    let (max_workers, source) = pick(overrides.max_workers, file.max_workers, || {
        DEFAULT_MAX_WORKERS
    });
    if max_workers == 0 {
        anyhow::bail!("max_workers must be at least 1");
    }
    report.record("max_workers", max_workers, source);

    let (queue_poll_interval_ms, source) = pick(None, file.queue_poll_interval_ms, || {
        DEFAULT_QUEUE_POLL_INTERVAL_MS
    });
    if queue_poll_interval_ms == 0 {
        anyhow::bail!("queue_poll_interval_ms must be positive");
    }
    report.record("queue_poll_interval_ms", queue_poll_interval_ms, source);

    let (monitor_poll_interval_secs, source) = pick(None, file.monitor_poll_interval_secs, || {
        DEFAULT_MONITOR_POLL_INTERVAL_SECS
    });
    if monitor_poll_interval_secs == 0 {
        anyhow::bail!("monitor_poll_interval_secs must be positive");
    }
    report.record("monitor_poll_interval_secs", monitor_poll_interval_secs, source);

    let (verification_delay_secs, source) = pick(None, file.verification_delay_secs, || {
        DEFAULT_VERIFICATION_DELAY_SECS
    });
    report.record("verification_delay_secs", verification_delay_secs, source);

    let (verbose, source) = pick(overrides.verbose, file.verbose, || false);
    report.record("verbose", verbose, source);

    let config = Config {
        database_path,
        local_data_location,
        credential_dir,
        known_hosts_path,
        strict_host_key_checking,
        session_idle_secs,
        ssh_keepalive_secs,
        transport_attempts,
        max_workers,
        queue_poll_interval_ms,
        monitor_poll_interval_secs,
        verification_delay_secs,
        verbose,
    };
    Ok(LoadResult { config, report })
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}

fn default_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME))
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME))
}
