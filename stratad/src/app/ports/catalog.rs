// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::catalog::{
    ApplicationDeployment, ApplicationInterface, CatalogKind, ComputeResource,
    GatewayResourceProfile, GroupResourceProfile, StorageResource, UserResourceProfile,
};
use crate::app::errors::AppResult;

/// Application and resource catalog lookups. `None` means the record does not exist.
#[async_trait]
pub trait CatalogPort: Send + Sync {
    async fn compute_resource(&self, id: &str) -> AppResult<Option<ComputeResource>>;
    async fn storage_resource(&self, id: &str) -> AppResult<Option<StorageResource>>;
    async fn application_deployment(&self, id: &str) -> AppResult<Option<ApplicationDeployment>>;
    async fn application_interface(&self, id: &str) -> AppResult<Option<ApplicationInterface>>;
    async fn gateway_profile(&self, gateway_id: &str) -> AppResult<Option<GatewayResourceProfile>>;
    async fn group_profile(&self, profile_id: &str) -> AppResult<Option<GroupResourceProfile>>;
    async fn user_profile(
        &self,
        user_id: &str,
        gateway_id: &str,
    ) -> AppResult<Option<UserResourceProfile>>;

    /// Stores a raw catalog document; used by the import command.
    async fn put_document(&self, kind: CatalogKind, key: &str, body: &serde_json::Value)
    -> AppResult<()>;
}
