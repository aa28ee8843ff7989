// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Export bundle
//!
//! A portable JSON snapshot of the effective profile of every identifier.
//! Versions are informational: importing re-applies the settings as new
//! versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{MxdError, Result};
use crate::profile::{ProfileId, SchemaRegistry, SettingsMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedProfile {
    pub identifier: ProfileId,
    pub version: u64,
    pub settings: SettingsMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    pub exported_at: DateTime<Utc>,
    pub profiles: Vec<ExportedProfile>,
}

impl ExportBundle {
    pub fn new(profiles: Vec<ExportedProfile>) -> Self {
        Self {
            exported_at: Utc::now(),
            profiles,
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Check every profile before any of them is applied.
    pub fn validate(&self, schema: &SchemaRegistry) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for profile in &self.profiles {
            if !seen.insert(&profile.identifier) {
                return Err(MxdError::InvalidInput(format!(
                    "bundle lists '{}' more than once",
                    profile.identifier
                )));
            }
            schema.validate(&profile.identifier, &profile.settings)?;
        }
        Ok(())
    }
}
