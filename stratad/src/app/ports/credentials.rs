// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::SshCredential;

#[async_trait]
pub trait CredentialStorePort: Send + Sync {
    async fn ssh_credential(&self, token: &str, gateway_id: &str)
    -> AppResult<Option<SshCredential>>;
}
