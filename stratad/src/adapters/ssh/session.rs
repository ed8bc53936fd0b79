// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::anyhow;
use russh::client::Config;
use russh::keys::known_hosts::learn_known_hosts_path;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::app::types::SshCredential;

use super::SshError;

mod auth;
mod exec;
mod sftp;

/// Host-key policy applied while the transport is negotiated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Unknown keys are rejected; only keys already in the file are accepted.
    Strict(PathBuf),
    /// Unknown keys are recorded in the file and accepted; changed keys are still rejected.
    Learn(PathBuf),
    Disabled,
}

#[derive(Clone, Debug)]
struct ClientHandler {
    host: String,
    addr: SocketAddr,
    policy: HostKeyPolicy,
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(&self.host, self.addr, server_public_key, &self.policy)
    }
}

fn verify_server_key(
    host: &str,
    addr: SocketAddr,
    key: &russh::keys::ssh_key::PublicKey,
    policy: &HostKeyPolicy,
) -> std::result::Result<bool, anyhow::Error> {
    let (path, learn) = match policy {
        HostKeyPolicy::Disabled => return Ok(true),
        HostKeyPolicy::Strict(path) => (path, false),
        HostKeyPolicy::Learn(path) => (path, true),
    };
    let port = addr.port();
    let ip_host = addr.ip().to_string();
    let mut candidates = vec![host.to_string()];
    if ip_host != host {
        candidates.push(ip_host);
    }
    for candidate in &candidates {
        match russh::keys::check_known_hosts_path(candidate, port, key, path) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => {
                log::warn!("server key validation failed for {host}:{port}: {err}");
                return Err(anyhow!(
                    "server key validation failed for {host}:{port}: {err}"
                ));
            }
        }
    }

    if !learn {
        log::warn!(
            "server key for {host}:{port} is not present in {} (tried {})",
            path.display(),
            candidates.join(", ")
        );
        return Ok(false);
    }
    log::info!("server key for {host}:{port} is not present in known_hosts; learning");
    learn_known_hosts_path(host, port, key, path).map_err(|err| {
        log::warn!("failed to learn server key for {host}:{port}: {err}");
        anyhow!("failed to learn server key for {host}:{port}: {err}")
    })?;
    Ok(true)
}

/// Everything needed to open and authenticate one SSH transport.
#[derive(Clone, Debug)]
pub struct SshParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: SshCredential,
    pub host_key_policy: HostKeyPolicy,
    pub keepalive_secs: u64,
}

impl SshParams {
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    fn config(&self) -> Config {
        Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(self.keepalive_secs.max(1))),
            // reasonable channel buffer and window sizes for streaming
            channel_buffer_size: 64,
            window_size: 1024 * 1024,
            ..Default::default()
        }
    }
}

/// One authenticated SSH transport. Channels are multiplexed over it, so
/// commands and SFTP streams from different tasks may run concurrently.
pub struct SshSession {
    target: String,
    handle: russh::client::Handle<ClientHandler>,
}

impl SshSession {
    /// Resolves the host, opens the transport and authenticates with the key pair.
    pub async fn connect(params: &SshParams) -> Result<Self, SshError> {
        let target = params.target();
        let connect_err = |reason: String| SshError::Connect {
            target: target.clone(),
            reason,
        };
        let addr = tokio::net::lookup_host((params.host.as_str(), params.port))
            .await
            .map_err(|err| connect_err(format!("resolve failed: {err}")))?
            .next()
            .ok_or_else(|| connect_err("host resolved to no addresses".to_string()))?;
        let handler = ClientHandler {
            host: params.host.clone(),
            addr,
            policy: params.host_key_policy.clone(),
        };
        log::debug!("connecting to {target} ({addr})");
        let mut handle = russh::client::connect(Arc::new(params.config()), addr, handler)
            .await
            .map_err(|err| connect_err(err.to_string()))?;
        auth::authenticate(&mut handle, &params.username, &params.credential, &target).await?;
        log::info!("established ssh session with {target}");
        Ok(Self { target, handle })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub async fn disconnect(&self) {
        if self.handle.is_closed() {
            return;
        }
        if let Err(err) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            log::debug!("disconnect from {} failed: {err}", self.target);
        }
    }
}
