// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::CredentialStorePort;
use crate::app::types::SshCredential;

const PRIVATE_KEY_FILE: &str = "id_rsa";
const PUBLIC_KEY_FILE: &str = "id_rsa.pub";
const PASSPHRASE_FILE: &str = "passphrase";

/// Key material laid out as `<dir>/<gateway>/<token>/` or, for tokens shared
/// across gateways, `<dir>/<token>/`. Each holds `id_rsa`, and optionally
/// `id_rsa.pub` and `passphrase`.
#[derive(Clone, Debug)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains('/')
        && !segment.contains('\\')
}

async fn read_optional(path: &Path) -> AppResult<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::remote_init(format!(
            "failed to read credential file {}: {err}",
            path.display()
        ))),
    }
}

#[async_trait]
impl CredentialStorePort for FileCredentialStore {
    async fn ssh_credential(
        &self,
        token: &str,
        gateway_id: &str,
    ) -> AppResult<Option<SshCredential>> {
        if !valid_segment(token) {
            return Err(AppError::invalid_argument(format!(
                "invalid credential token '{token}'"
            )));
        }
        let mut candidates = Vec::with_capacity(2);
        if valid_segment(gateway_id) {
            candidates.push(self.dir.join(gateway_id).join(token));
        }
        candidates.push(self.dir.join(token));

        for base in candidates {
            let Some(private_key) = read_optional(&base.join(PRIVATE_KEY_FILE)).await? else {
                continue;
            };
            let public_key = read_optional(&base.join(PUBLIC_KEY_FILE)).await?;
            let passphrase = read_optional(&base.join(PASSPHRASE_FILE))
                .await?
                .map(|p| p.trim_end_matches(['\r', '\n']).to_string())
                .filter(|p| !p.is_empty());
            tracing::debug!(token, path = %base.display(), "resolved ssh credential");
            return Ok(Some(SshCredential {
                private_key,
                public_key,
                passphrase,
            }));
        }
        Ok(None)
    }
}
