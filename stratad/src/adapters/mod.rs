// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod cli;
pub mod cluster;
pub mod credentials;
pub mod db;
pub mod ssh;
pub mod status_bus;
pub mod time;
