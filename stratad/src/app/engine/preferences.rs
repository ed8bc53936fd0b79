// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Layered compute and storage preference resolution.
//!
//! Every field is looked up user layer first, then group, then gateway, then
//! the profile-wide default; scheduling overrides on the process beat all of
//! them.

use crate::app::catalog::{
    ComputePreference, GatewayResourceProfile, GroupResourceProfile, StoragePreference,
    UserResourceProfile,
};
use crate::app::errors::{AppError, AppResult};
use crate::app::types::{DataMovementProtocol, JobSubmissionProtocol, ResourceScheduling};

/// One preference layer: the per-resource entry plus the layer's default token.
#[derive(Debug, Clone, Copy, Default)]
pub struct Layer<'a> {
    pub preference: Option<&'a ComputePreference>,
    pub default_token: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ComputeLayers<'a> {
    pub user: Layer<'a>,
    pub group: Layer<'a>,
    pub gateway: Layer<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCompute {
    pub login_user: String,
    pub credential_token: String,
    pub scratch_location: String,
    pub allocation: Option<String>,
    pub batch_queue: Option<String>,
    pub submission_protocol: Option<JobSubmissionProtocol>,
    pub data_movement_protocol: Option<DataMovementProtocol>,
    pub usage_reporting_gateway_id: Option<String>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl<'a> ComputeLayers<'a> {
    pub fn build(
        resource_id: &str,
        user: Option<&'a UserResourceProfile>,
        group: Option<&'a GroupResourceProfile>,
        gateway: Option<&'a GatewayResourceProfile>,
    ) -> Self {
        let pick = |prefs: &'a [ComputePreference]| {
            prefs
                .iter()
                .find(|pref| pref.compute_resource_id == resource_id)
        };
        Self {
            user: Layer {
                preference: user.and_then(|p| pick(p.user_compute_resource_preferences.as_slice())),
                default_token: user.and_then(|p| p.credential_store_token.as_deref()),
            },
            group: Layer {
                preference: group.and_then(|p| pick(p.compute_preferences.as_slice())),
                default_token: group.and_then(|p| p.default_credential_store_token.as_deref()),
            },
            gateway: Layer {
                preference: gateway.and_then(|p| pick(p.compute_resource_preferences.as_slice())),
                default_token: gateway.and_then(|p| p.credential_store_token.as_deref()),
            },
        }
    }

    fn preferences(&self) -> impl Iterator<Item = &'a ComputePreference> {
        [self.user.preference, self.group.preference, self.gateway.preference]
            .into_iter()
            .flatten()
    }

    fn first_str(&self, field: impl Fn(&'a ComputePreference) -> Option<&'a str>) -> Option<String> {
        self.preferences()
            .find_map(|pref| non_blank(field(pref)))
            .map(str::to_string)
    }

    /// Credential token: each layer's resource-specific token, then that
    /// layer's default, in user → group → gateway order; `fallback` last.
    pub fn credential_token(&self, fallback: &str) -> Option<String> {
        [self.user, self.group, self.gateway]
            .into_iter()
            .find_map(|layer| {
                non_blank(
                    layer
                        .preference
                        .and_then(|p| p.resource_specific_credential_store_token.as_deref()),
                )
                .or_else(|| non_blank(layer.default_token))
            })
            .or_else(|| non_blank(Some(fallback)))
            .map(str::to_string)
    }

    pub fn resolve(
        &self,
        resource_id: &str,
        scheduling: &ResourceScheduling,
        fallback_token: &str,
    ) -> AppResult<ResolvedCompute> {
        let login_user = non_blank(scheduling.override_login_user_name.as_deref())
            .map(str::to_string)
            .or_else(|| self.first_str(|p| p.login_user_name.as_deref()))
            .ok_or_else(|| {
                AppError::catalog(format!("no login user configured for resource {resource_id}"))
            })?;
        let credential_token = self.credential_token(fallback_token).ok_or_else(|| {
            AppError::catalog(format!(
                "no credential token configured for resource {resource_id}"
            ))
        })?;
        let scratch_location = non_blank(scheduling.override_scratch_location.as_deref())
            .map(str::to_string)
            .or_else(|| self.first_str(|p| p.scratch_location.as_deref()))
            .ok_or_else(|| {
                AppError::catalog(format!(
                    "no scratch location configured for resource {resource_id}"
                ))
            })?;
        Ok(ResolvedCompute {
            login_user,
            credential_token,
            scratch_location,
            allocation: non_blank(scheduling.override_allocation_project_number.as_deref())
                .map(str::to_string)
                .or_else(|| self.first_str(|p| p.allocation_project_number.as_deref())),
            batch_queue: self.first_str(|p| p.preferred_batch_queue.as_deref()),
            submission_protocol: self
                .preferences()
                .find_map(|p| p.preferred_job_submission_protocol),
            data_movement_protocol: self
                .preferences()
                .find_map(|p| p.preferred_data_movement_protocol),
            usage_reporting_gateway_id: self.first_str(|p| p.usage_reporting_gateway_id.as_deref()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStorage {
    pub login_user: String,
    pub credential_token: String,
    pub root: String,
}

/// Storage preference chain: user → gateway, then profile default tokens.
pub fn resolve_storage(
    storage_resource_id: &str,
    user: Option<&UserResourceProfile>,
    gateway: Option<&GatewayResourceProfile>,
    fallback_token: &str,
) -> AppResult<ResolvedStorage> {
    let user_pref: Option<&StoragePreference> = user.and_then(|p| {
        p.user_storage_preferences
            .iter()
            .find(|pref| pref.storage_resource_id == storage_resource_id)
    });
    let gateway_pref: Option<&StoragePreference> = gateway.and_then(|p| {
        p.storage_preferences
            .iter()
            .find(|pref| pref.storage_resource_id == storage_resource_id)
    });
    let prefs = [user_pref, gateway_pref];
    let first = |field: fn(&StoragePreference) -> Option<&str>| {
        prefs
            .into_iter()
            .flatten()
            .find_map(|pref| non_blank(field(pref)))
            .map(str::to_string)
    };
    let login_user = first(|p| p.login_user_name.as_deref()).ok_or_else(|| {
        AppError::catalog(format!(
            "no login user configured for storage {storage_resource_id}"
        ))
    })?;
    let credential_token = first(|p| p.resource_specific_credential_store_token.as_deref())
        .or_else(|| non_blank(user.and_then(|p| p.credential_store_token.as_deref())).map(str::to_string))
        .or_else(|| {
            non_blank(gateway.and_then(|p| p.credential_store_token.as_deref())).map(str::to_string)
        })
        .or_else(|| non_blank(Some(fallback_token)).map(str::to_string))
        .ok_or_else(|| {
            AppError::catalog(format!(
                "no credential token configured for storage {storage_resource_id}"
            ))
        })?;
    let root = first(|p| p.file_system_root_location.as_deref()).ok_or_else(|| {
        AppError::catalog(format!(
            "no file system root configured for storage {storage_resource_id}"
        ))
    })?;
    Ok(ResolvedStorage {
        login_user,
        credential_token,
        root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pref(login: Option<&str>, token: Option<&str>, scratch: Option<&str>) -> ComputePreference {
        ComputePreference {
            compute_resource_id: "cr".into(),
            login_user_name: login.map(str::to_string),
            scratch_location: scratch.map(str::to_string),
            resource_specific_credential_store_token: token.map(str::to_string),
            ..Default::default()
        }
    }

    fn gateway(pref: ComputePreference) -> GatewayResourceProfile {
        GatewayResourceProfile {
            gateway_id: "gw".into(),
            credential_store_token: Some("gw-default".into()),
            compute_resource_preferences: vec![pref],
            storage_preferences: vec![],
        }
    }

    #[test]
    fn user_layer_wins_and_blank_values_fall_through() {
        let user = UserResourceProfile {
            user_id: "alice".into(),
            gateway_id: "gw".into(),
            credential_store_token: None,
            user_compute_resource_preferences: vec![pref(Some("alice_hpc"), None, Some("  "))],
            user_storage_preferences: vec![],
        };
        let group = GroupResourceProfile {
            group_resource_profile_id: "grp".into(),
            gateway_id: "gw".into(),
            default_credential_store_token: Some("grp-default".into()),
            compute_preferences: vec![pref(Some("community"), None, Some("/scratch/grp"))],
        };
        let gw = gateway(pref(Some("gwuser"), Some("gw-cr"), Some("/scratch/gw")));

        let layers = ComputeLayers::build("cr", Some(&user), Some(&group), Some(&gw));
        let resolved = layers
            .resolve("cr", &ResourceScheduling::default(), "msg-token")
            .expect("resolved");
        assert_eq!(resolved.login_user, "alice_hpc");
        assert_eq!(resolved.scratch_location, "/scratch/grp");
        assert_eq!(resolved.credential_token, "grp-default");
    }

    #[test]
    fn gateway_then_message_token_are_the_last_fallbacks() {
        let gw = GatewayResourceProfile {
            credential_store_token: None,
            ..gateway(pref(Some("gwuser"), None, Some("/scratch/gw")))
        };
        let layers = ComputeLayers::build("cr", None, None, Some(&gw));
        assert_eq!(layers.credential_token("msg-token").as_deref(), Some("msg-token"));

        let gw = gateway(pref(Some("gwuser"), None, Some("/scratch/gw")));
        let layers = ComputeLayers::build("cr", None, None, Some(&gw));
        assert_eq!(layers.credential_token("msg-token").as_deref(), Some("gw-default"));
    }

    #[test]
    fn scheduling_overrides_beat_every_layer() {
        let gw = gateway(pref(Some("gwuser"), Some("tok"), Some("/scratch/gw")));
        let scheduling = ResourceScheduling {
            override_login_user_name: Some("override".into()),
            override_scratch_location: Some("/scratch/override".into()),
            override_allocation_project_number: Some("TG-1".into()),
            ..Default::default()
        };
        let resolved = ComputeLayers::build("cr", None, None, Some(&gw))
            .resolve("cr", &scheduling, "")
            .expect("resolved");
        assert_eq!(resolved.login_user, "override");
        assert_eq!(resolved.scratch_location, "/scratch/override");
        assert_eq!(resolved.allocation.as_deref(), Some("TG-1"));
    }

    #[test]
    fn missing_login_is_a_catalog_error() {
        let gw = gateway(pref(None, Some("tok"), Some("/scratch")));
        let err = ComputeLayers::build("cr", None, None, Some(&gw))
            .resolve("cr", &ResourceScheduling::default(), "")
            .expect_err("no login");
        assert_eq!(err.kind(), crate::app::errors::AppErrorKind::CatalogAccess);
    }

    #[test]
    fn storage_prefers_user_entry() {
        let user = UserResourceProfile {
            user_id: "alice".into(),
            gateway_id: "gw".into(),
            credential_store_token: Some("user-tok".into()),
            user_compute_resource_preferences: vec![],
            user_storage_preferences: vec![StoragePreference {
                storage_resource_id: "st".into(),
                login_user_name: Some("alice".into()),
                file_system_root_location: None,
                resource_specific_credential_store_token: None,
            }],
        };
        let gw = GatewayResourceProfile {
            gateway_id: "gw".into(),
            credential_store_token: Some("gw-tok".into()),
            compute_resource_preferences: vec![],
            storage_preferences: vec![StoragePreference {
                storage_resource_id: "st".into(),
                login_user_name: Some("gwstore".into()),
                file_system_root_location: Some("/var/gw".into()),
                resource_specific_credential_store_token: None,
            }],
        };
        let resolved = resolve_storage("st", Some(&user), Some(&gw), "msg").expect("storage");
        assert_eq!(resolved.login_user, "alice");
        assert_eq!(resolved.root, "/var/gw");
        assert_eq!(resolved.credential_token, "user-tok");
    }
}
