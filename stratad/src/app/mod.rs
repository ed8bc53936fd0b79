// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod catalog;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod monitor;
pub mod ports;
pub mod runtime;
pub mod services;
pub mod tasks;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;
