// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Profile store
//!
//! Validates and stages new profile versions and serves committed ones.
//! A staged profile only becomes durable when it is committed through the
//! transaction writer together with its `applied` ledger entry.

use std::sync::Arc;

use super::Shared;
use crate::error::{MxdError, Result};
use crate::profile::{Profile, ProfileId, SettingsMap, VersionInfo};

#[derive(Clone)]
pub struct ProfileStore {
    shared: Arc<Shared>,
}

impl ProfileStore {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Validate `settings` and stage them as the next version.
    ///
    /// Fails with [`MxdError::SchemaViolation`] before anything is
    /// allocated.
    pub async fn put(&self, identifier: &ProfileId, settings: SettingsMap) -> Result<Profile> {
        self.shared.schema.validate(identifier, &settings)?;
        Ok(self.restage(identifier, settings).await)
    }

    /// Stage settings that were validated when first committed.
    ///
    /// Used to restore a last-good payload: a schema extension removed
    /// since then must not block a rollback.
    pub(crate) async fn restage(&self, identifier: &ProfileId, settings: SettingsMap) -> Profile {
        let committed_max = {
            let tables = self.shared.tables.read().await;
            tables
                .shards
                .get(identifier)
                .map(|s| s.max_version())
                .unwrap_or(0)
        };

        let version = {
            let mut reservations = self.shared.reservations.lock().await;
            let reserved = reservations.entry(identifier.clone()).or_insert(0);
            *reserved = (*reserved).max(committed_max) + 1;
            *reserved
        };

        tracing::debug!(identifier = %identifier, version, "Staged profile version");
        Profile::staged(identifier.clone(), version, settings)
    }

    /// A specific version, or the effective one when `version` is `None`.
    pub async fn get(&self, identifier: &ProfileId, version: Option<u64>) -> Result<Profile> {
        let tables = self.shared.tables.read().await;
        let shard = tables
            .shards
            .get(identifier)
            .ok_or_else(|| MxdError::not_found(identifier))?;

        match version {
            Some(v) => shard.resolved(v).ok_or_else(|| {
                MxdError::NotFound(format!("no version {} for '{}'", v, identifier))
            }),
            None => shard
                .effective_version()
                .and_then(|v| shard.resolved(v))
                .ok_or_else(|| MxdError::not_found(identifier)),
        }
    }

    /// Version metadata, ascending.
    pub async fn list_versions(&self, identifier: &ProfileId) -> Result<Vec<VersionInfo>> {
        let tables = self.shared.tables.read().await;
        let shard = tables
            .shards
            .get(identifier)
            .filter(|s| !s.profiles.is_empty())
            .ok_or_else(|| MxdError::not_found(identifier))?;
        let effective = shard.effective_version();

        Ok(shard
            .profiles
            .iter()
            .filter_map(|p| shard.resolved(p.version))
            .map(|p| VersionInfo {
                version: p.version,
                status: p.status,
                created_at: p.created_at,
                setting_count: p.settings.len(),
                effective: effective == Some(p.version),
            })
            .collect())
    }

    /// Effective version number, if any.
    pub async fn effective_version(&self, identifier: &ProfileId) -> Option<u64> {
        let tables = self.shared.tables.read().await;
        tables
            .shards
            .get(identifier)
            .and_then(|s| s.effective_version())
    }

    /// Every identifier that has a shard, sorted.
    pub async fn identifiers(&self) -> Vec<ProfileId> {
        let tables = self.shared.tables.read().await;
        let mut ids: Vec<ProfileId> = tables.shards.keys().cloned().collect();
        ids.sort();
        ids
    }
}
