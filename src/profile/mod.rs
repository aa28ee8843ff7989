// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Optimization profiles
//!
//! A profile is a versioned bundle of typed settings for one scope: the
//! whole system (`global`) or a single application/game key.

pub mod defaults;
pub mod schema;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{MxdError, Result};

pub use schema::{Category, SchemaExtension, SchemaRegistry, SettingSpec};

/// Reserved identifier for the system-wide profile.
pub const GLOBAL_KEY: &str = "global";

/// Scope of a profile
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProfileId {
    /// System-wide settings
    Global,
    /// Settings for one application or game
    App(String),
}

impl ProfileId {
    /// Create an identifier for an application/game key.
    pub fn app(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        Self::from_str(&key)
    }

    /// Schema category this identifier validates against.
    pub fn category(&self) -> Category {
        match self {
            ProfileId::Global => Category::Global,
            ProfileId::App(_) => Category::App,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProfileId::Global => GLOBAL_KEY,
            ProfileId::App(key) => key,
        }
    }
}

impl FromStr for ProfileId {
    type Err = MxdError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(MxdError::InvalidInput(
                "profile identifier cannot be empty".to_string(),
            ));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(MxdError::InvalidInput(format!(
                "profile identifier '{}' contains control characters",
                trimmed.escape_debug()
            )));
        }
        if trimmed.eq_ignore_ascii_case(GLOBAL_KEY) {
            Ok(ProfileId::Global)
        } else {
            Ok(ProfileId::App(trimmed.to_string()))
        }
    }
}

impl TryFrom<String> for ProfileId {
    type Error = MxdError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ProfileId> for String {
    fn from(id: ProfileId) -> Self {
        id.as_str().to_string()
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed setting value.
///
/// Serialized untagged so that persisted payloads read like plain JSON:
/// `60` is an integer, `60.0` a float, `"fsr2_quality"` a choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Choice(String),
}

impl SettingValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Bool(_) => "boolean",
            SettingValue::Integer(_) => "integer",
            SettingValue::Float(_) => "float",
            SettingValue::Choice(_) => "choice",
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(b) => write!(f, "{}", b),
            SettingValue::Integer(i) => write!(f, "{}", i),
            SettingValue::Float(x) => write!(f, "{}", x),
            SettingValue::Choice(s) => f.write_str(s),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        SettingValue::Integer(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Float(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Choice(value.to_string())
    }
}

/// Setting name to value, ordered for stable persistence.
pub type SettingsMap = BTreeMap<String, SettingValue>;

/// Lifecycle tag of a profile version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    /// Staged, not yet durable
    Pending,
    /// Durable and immutable
    Committed,
    /// Committed, later undone by a `reverted` ledger entry
    Reverted,
}

impl ProfileStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ProfileStatus::Pending => "pending",
            ProfileStatus::Committed => "committed",
            ProfileStatus::Reverted => "reverted",
        }
    }
}

/// One immutable version of a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub identifier: ProfileId,
    pub version: u64,
    pub settings: SettingsMap,
    pub status: ProfileStatus,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub(crate) fn staged(identifier: ProfileId, version: u64, settings: SettingsMap) -> Self {
        Self {
            identifier,
            version,
            settings,
            status: ProfileStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Look up a single setting.
    pub fn setting(&self, key: &str) -> Option<&SettingValue> {
        self.settings.get(key)
    }
}

/// Version metadata returned by `list_versions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: u64,
    pub status: ProfileStatus,
    pub created_at: DateTime<Utc>,
    pub setting_count: usize,
    /// Whether this is the currently effective version
    pub effective: bool,
}
