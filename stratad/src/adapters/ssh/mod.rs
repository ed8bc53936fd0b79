// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::CredentialStorePort;
use crate::app::types::ServerInfo;

mod error;
mod session;

pub mod session_cache;

use session_cache::{SessionCache, SessionKey};

pub use error::SshError;
pub use crate::app::services::retry::RetryPolicy;
pub use session::{HostKeyPolicy, SshParams, SshSession};

#[derive(Clone, Debug)]
pub struct SshSettings {
    pub host_key_policy: HostKeyPolicy,
    pub keepalive_secs: u64,
    pub idle_timeout: Duration,
    pub retry: RetryPolicy,
}

/// The one SSH session provider: pooled sessions plus the transport retry policy.
pub struct SshSessionProvider {
    sessions: Arc<SessionCache<SshSession>>,
    credentials: Arc<dyn CredentialStorePort>,
    settings: SshSettings,
}

impl SshSessionProvider {
    pub fn new(credentials: Arc<dyn CredentialStorePort>, settings: SshSettings) -> Self {
        Self {
            sessions: Arc::new(SessionCache::new(settings.idle_timeout)),
            credentials,
            settings,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionCache<SshSession>> {
        &self.sessions
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, server),
        fields(op = "acquire", host = %server.host, user = %server.login_user, port = server.port)
    )]
    pub async fn acquire(&self, server: &ServerInfo, gateway_id: &str) -> AppResult<Arc<SshSession>> {
        let key = SessionKey::from(server);
        self.sessions
            .acquire(&key, || async {
                let credential = self
                    .credentials
                    .ssh_credential(&server.credential_token, gateway_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::remote_init(format!(
                            "no ssh credential stored for token '{}' of gateway '{}'",
                            server.credential_token, gateway_id
                        ))
                    })?;
                let params = SshParams {
                    host: server.host.clone(),
                    port: server.port,
                    username: server.login_user.clone(),
                    credential,
                    host_key_policy: self.settings.host_key_policy.clone(),
                    keepalive_secs: self.settings.keepalive_secs,
                };
                SshSession::connect(&params).await.map_err(AppError::from)
            })
            .await
    }

    /// Runs `op` on a validated session, retrying transport failures on a
    /// freshly acquired session each time.
    pub async fn run<T, F, Fut>(
        &self,
        server: &ServerInfo,
        gateway_id: &str,
        op_name: &'static str,
        op: F,
    ) -> AppResult<T>
    where
        F: Fn(Arc<SshSession>) -> Fut,
        Fut: Future<Output = Result<T, SshError>>,
    {
        let key = SessionKey::from(server);
        let op = &op;
        let key = &key;
        self.settings
            .retry
            .run(op_name, |attempt| async move {
                let session = self.acquire(server, gateway_id).await?;
                match op(session).await {
                    Ok(value) => Ok(value),
                    Err(err) => {
                        if err.is_transport() {
                            tracing::debug!(op = op_name, attempt, session = %key, "dropping session after transport failure");
                            self.sessions.invalidate(key).await;
                        }
                        Err(AppError::from(err))
                    }
                }
            })
            .await
    }
}
