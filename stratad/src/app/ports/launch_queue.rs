// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::errors::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LaunchKind {
    Launch,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchMessage {
    pub kind: LaunchKind,
    pub process_id: String,
    pub experiment_id: String,
    pub gateway_id: String,
    pub token_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: i64,
    pub message: LaunchMessage,
    /// Delivered before but never acknowledged.
    pub redelivered: bool,
}

/// Durable inbound queue of launch and cancel messages.
#[async_trait]
pub trait LaunchQueuePort: Send + Sync {
    async fn publish(&self, message: &LaunchMessage) -> AppResult<i64>;
    /// Hands out the oldest pending message and marks it delivered.
    async fn next_delivery(&self) -> AppResult<Option<Delivery>>;
    async fn ack(&self, delivery_tag: i64) -> AppResult<()>;
    /// Returns delivered-but-unacknowledged messages to the pending set; called at startup.
    async fn requeue_unacked(&self) -> AppResult<u64>;
}
