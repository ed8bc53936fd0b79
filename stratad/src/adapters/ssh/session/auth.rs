// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use russh::client::AuthResult;
use russh::keys::PrivateKeyWithHashAlg;
use std::sync::Arc;

use crate::adapters::ssh::SshError;
use crate::app::types::SshCredential;

use super::ClientHandler;

fn auth_succeeded(result: &AuthResult) -> bool {
    match result {
        AuthResult::Success => true,
        AuthResult::Failure {
            remaining_methods,
            partial_success,
        } => {
            log::debug!(
                "publickey authentication rejected (partial_success={}, remaining={:?})",
                partial_success,
                remaining_methods
            );
            false
        }
    }
}

fn decode_key(
    credential: &SshCredential,
) -> Result<russh::keys::PrivateKey, SshError> {
    russh::keys::decode_secret_key(&credential.private_key, credential.passphrase.as_deref())
        .map_err(|err| SshError::Credential(format!("failed to decode private key: {err}")))
}

/// Key-pair authentication; the passphrase, when present, unlocks the key.
pub(super) async fn authenticate(
    handle: &mut russh::client::Handle<ClientHandler>,
    username: &str,
    credential: &SshCredential,
    target: &str,
) -> Result<(), SshError> {
    let key = Arc::new(decode_key(credential)?);
    let channel_err = |err: russh::Error| SshError::Connect {
        target: target.to_string(),
        reason: err.to_string(),
    };
    // Prefer SHA-256 for RSA if applicable (ignored for non-RSA keys)
    let hash = handle
        .best_supported_rsa_hash()
        .await
        .map_err(channel_err)?
        .flatten();
    let result = handle
        .authenticate_publickey(username.to_string(), PrivateKeyWithHashAlg::new(key, hash))
        .await
        .map_err(channel_err)?;
    if auth_succeeded(&result) {
        Ok(())
    } else {
        Err(SshError::Authentication(target.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::client::AuthResult;
    use russh::{MethodKind, MethodSet};

    #[test]
    fn success_is_authenticated() {
        assert!(auth_succeeded(&AuthResult::Success));
    }

    #[test]
    fn partial_success_is_not_enough() {
        let methods = [MethodKind::KeyboardInteractive];
        assert!(!auth_succeeded(&AuthResult::Failure {
            remaining_methods: MethodSet::from(methods.as_slice()),
            partial_success: true,
        }));
    }

    #[test]
    fn garbage_key_is_a_credential_error() {
        let credential = SshCredential {
            private_key: "not a key".into(),
            public_key: None,
            passphrase: None,
        };
        let err = decode_key(&credential).expect_err("decode must fail");
        assert!(matches!(err, SshError::Credential(_)));
    }
}
