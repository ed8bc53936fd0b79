// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use russh::ChannelMsg;

use crate::adapters::ssh::SshError;
use crate::app::ports::CommandOutput;

use super::SshSession;

/// Folds one channel message into the capture buffers; `true` once the channel closed.
fn handle_capture_message(
    msg: &ChannelMsg,
    out: &mut Vec<u8>,
    err: &mut Vec<u8>,
    code: &mut i32,
) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            out.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            err.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            *code = *exit_status as i32;
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

impl SshSession {
    /// Runs a command and collects stdout, stderr and the exit code.
    pub async fn exec_capture(&self, cmd: &str) -> Result<CommandOutput, SshError> {
        let mut chan = self
            .handle
            .channel_open_session()
            .await
            .map_err(|err| SshError::Channel(format!("open session: {err}")))?;
        log::debug!("executing '{}' on {}", cmd, self.target);
        chan.exec(true, cmd)
            .await
            .map_err(|err| SshError::Channel(format!("exec request: {err}")))?;
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code: i32 = 0;
        let mut closed = false;
        while let Some(msg) = chan.wait().await {
            if handle_capture_message(&msg, &mut out, &mut err, &mut code) {
                closed = true;
                break;
            }
        }
        if !closed && self.handle.is_closed() {
            return Err(SshError::Channel(format!(
                "connection to {} dropped while running command",
                self.target
            )));
        }
        let _ = chan.close().await;
        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            exit_code: code,
        })
    }

    /// Smoke test used when a cached session is handed out again.
    pub async fn probe(&self) -> bool {
        if self.handle.is_closed() {
            return false;
        }
        match self.exec_capture("true").await {
            Ok(output) => output.exit_code == 0,
            Err(err) => {
                log::debug!("session probe for {} failed: {err}", self.target);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::handle_capture_message;
    use russh::{ChannelMsg, CryptoVec};

    #[test]
    fn handle_capture_message_accumulates_output() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = 0;

        let msg = ChannelMsg::Data {
            data: CryptoVec::from_slice(b"Submitted batch job 7"),
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(out, b"Submitted batch job 7");

        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"warning"),
            ext: 1,
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(err, b"warning");

        let msg = ChannelMsg::ExitStatus { exit_status: 3 };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert_eq!(code, 3);

        assert!(handle_capture_message(
            &ChannelMsg::Close,
            &mut out,
            &mut err,
            &mut code
        ));
    }

    #[test]
    fn other_extended_streams_are_ignored() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let mut code = 0;
        let msg = ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(b"x"),
            ext: 2,
        };
        assert!(!handle_capture_message(&msg, &mut out, &mut err, &mut code));
        assert!(err.is_empty());
    }
}
