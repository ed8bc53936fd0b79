// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriScheme {
    /// `file://` on the gateway host.
    File,
    /// `scp://` or `sftp://` on a named host, usually a storage resource.
    Ssh,
    /// Bare path on whichever host the caller is already talking to.
    Bare,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub scheme: UriScheme,
    pub user: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
}

pub fn parse(raw: &str) -> AppResult<DataUri> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::invalid_argument("empty data uri"));
    }
    let Some((scheme, rest)) = raw.split_once("://") else {
        return Ok(DataUri {
            scheme: UriScheme::Bare,
            user: None,
            host: None,
            port: None,
            path: raw.to_string(),
        });
    };
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "file" => UriScheme::File,
        "scp" | "sftp" | "ssh" => UriScheme::Ssh,
        other => {
            return Err(AppError::invalid_argument(format!(
                "unsupported uri scheme '{other}' in {raw}"
            )));
        }
    };
    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    let (user, host_port) = match authority.rsplit_once('@') {
        Some((user, host)) => (Some(user.to_string()), host),
        None => (None, authority),
    };
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| AppError::invalid_argument(format!("invalid port in {raw}")))?;
            (host, Some(port))
        }
        None => (host_port, None),
    };
    let host = Some(host.to_string()).filter(|h| !h.is_empty());
    if scheme == UriScheme::Ssh && host.is_none() {
        return Err(AppError::invalid_argument(format!("missing host in {raw}")));
    }
    Ok(DataUri {
        scheme,
        user,
        host,
        port,
        path: path.to_string(),
    })
}

pub fn ssh_uri(user: &str, host: &str, port: u16, path: &str) -> String {
    format!("scp://{user}@{host}:{port}{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_uris() {
        let uri = parse("file:///home/gw/data/in.dat").unwrap();
        assert_eq!(uri.scheme, UriScheme::File);
        assert_eq!(uri.path, "/home/gw/data/in.dat");
        assert!(uri.host.is_none());
    }

    #[test]
    fn parses_scp_uris_with_user_and_port() {
        let uri = parse("scp://gwuser@storage.example.org:2222/var/gw/exp1/in.dat").unwrap();
        assert_eq!(uri.scheme, UriScheme::Ssh);
        assert_eq!(uri.user.as_deref(), Some("gwuser"));
        assert_eq!(uri.host.as_deref(), Some("storage.example.org"));
        assert_eq!(uri.port, Some(2222));
        assert_eq!(uri.path, "/var/gw/exp1/in.dat");
    }

    #[test]
    fn bare_paths_stay_bare() {
        let uri = parse("/scratch/p1/out.log").unwrap();
        assert_eq!(uri.scheme, UriScheme::Bare);
        assert_eq!(uri.path, "/scratch/p1/out.log");
    }

    #[test]
    fn rejects_unknown_schemes_and_missing_hosts() {
        assert!(parse("gsiftp://grid/x").is_err());
        assert!(parse("sftp:///x").is_err());
        assert!(parse("scp://h:notaport/x").is_err());
    }

    #[test]
    fn builds_ssh_uri() {
        assert_eq!(ssh_uri("u", "h", 22, "/a"), "scp://u@h:22/a");
    }
}
