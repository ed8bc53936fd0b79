// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod ids;
pub mod managers;
pub mod parsers;
pub mod retry;
pub mod script;
pub mod shell;
pub mod transfer;
pub mod uri;
