// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Very small, safe-ish shell escaper for paths and arguments.
pub fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// Joins a working directory and a file name with exactly one separator.
pub fn join_remote(dir: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// Last path segment of a remote path or URI path.
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Paths that must never be removed recursively.
pub fn is_unsafe_cleanup_path(remote_path: &str) -> bool {
    let trimmed = remote_path.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.starts_with('~')
        || trimmed.contains("/../")
        || trimmed.ends_with("/..")
    {
        return true;
    }
    let normalized = trimmed.trim_end_matches('/');
    if normalized.is_empty() {
        return true;
    }
    // top-level directories such as /home or /scratch
    normalized.matches('/').count() < 2 && normalized.starts_with('/')
}
