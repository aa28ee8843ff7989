// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for mxd
//!
//! Handles loading and saving settings from ~/.mxd/settings.json

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

mod io;
mod keys;
mod migration;
mod validation;

pub use keys::SETTING_KEYS;

/// Main settings structure, stored in ~/.mxd/settings.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Settings file format, stamped on load
    #[serde(default = "default_settings_version")]
    pub settings_version: u32,

    /// Profile store location and seeding
    #[serde(default)]
    pub store: StoreConfig,

    /// Evaluation window and stability monitor settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Schema extension settings
    #[serde(default)]
    pub schema: SchemaConfig,
}

/// Profile store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store directory (default: $MXD_HOME/store)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Commit the built-in default profiles for identifiers that have none
    #[serde(default = "default_true")]
    pub seed_defaults: bool,
}

/// Evaluation window configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// How long an applied version stays provisional
    #[serde(default = "default_evaluation_window_secs")]
    pub evaluation_window_secs: u64,

    /// Delay before the stability monitor takes its first sample
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,

    /// Interval between stability samples
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Minimum `Score` verdict that counts as acceptable (0.0 - 1.0)
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f32,

    /// Resolve or re-arm evaluations left open by a previous process
    #[serde(default = "default_true")]
    pub resume_on_open: bool,
}

impl MonitorConfig {
    pub fn evaluation_window(&self) -> Duration {
        Duration::from_secs(self.evaluation_window_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

/// Schema extension configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaConfig {
    /// TOML file declaring additional settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions_path: Option<PathBuf>,
}

fn default_settings_version() -> u32 {
    migration::CURRENT_VERSION
}

fn default_true() -> bool {
    true
}

fn default_evaluation_window_secs() -> u64 {
    120
}

fn default_settle_secs() -> u64 {
    10
}

fn default_check_interval_secs() -> u64 {
    5
}

fn default_acceptance_threshold() -> f32 {
    0.5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            settings_version: default_settings_version(),
            store: StoreConfig::default(),
            monitor: MonitorConfig::default(),
            schema: SchemaConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            seed_defaults: true,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            evaluation_window_secs: default_evaluation_window_secs(),
            settle_secs: default_settle_secs(),
            check_interval_secs: default_check_interval_secs(),
            acceptance_threshold: default_acceptance_threshold(),
            resume_on_open: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert!(settings.store.seed_defaults);
        assert!(settings.store.data_dir.is_none());
        assert!(settings.schema.extensions_path.is_none());
    }

    #[test]
    fn test_monitor_config_default() {
        let config = MonitorConfig::default();
        assert_eq!(config.evaluation_window_secs, 120);
        assert_eq!(config.settle_secs, 10);
        assert_eq!(config.check_interval_secs, 5);
        assert!((config.acceptance_threshold - 0.5).abs() < f32::EPSILON);
        assert!(config.resume_on_open);
        assert_eq!(config.evaluation_window(), Duration::from_secs(120));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"monitor": {"evaluation_window_secs": 30}}"#).unwrap();
        assert_eq!(settings.monitor.evaluation_window_secs, 30);
        assert_eq!(settings.monitor.check_interval_secs, 5);
        assert!(settings.store.seed_defaults);
    }

    #[test]
    fn test_settings_load_from_nonexistent() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from(&dir.path().join("missing.json")).unwrap();
        assert_eq!(settings.monitor, MonitorConfig::default());
    }

    #[test]
    fn test_settings_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.monitor.evaluation_window_secs = 45;
        settings.store.data_dir = Some(dir.path().join("store"));
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.monitor.evaluation_window_secs, 45);
        assert_eq!(loaded.store.data_dir, Some(dir.path().join("store")));
    }

    #[test]
    fn test_save_preserves_unknown_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"ui": {"theme": "dark"}, "monitor": {"settle_secs": 3, "legacy": 1}}"#,
        )
        .unwrap();

        let mut settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.monitor.settle_secs, 3);
        settings.monitor.settle_secs = 4;
        settings.save_to(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["ui"]["theme"], "dark");
        assert_eq!(raw["monitor"]["legacy"], 1);
        assert_eq!(raw["monitor"]["settle_secs"], 4);
    }

    #[test]
    fn test_data_dir_override() {
        let mut settings = Settings::default();
        settings.store.data_dir = Some(PathBuf::from("/tmp/mxd-store"));
        assert_eq!(settings.data_dir(), PathBuf::from("/tmp/mxd-store"));
    }

    #[test]
    fn test_default_data_dir_under_home() {
        let settings = Settings::default();
        assert_eq!(settings.data_dir(), Settings::mxd_home().join("store"));
    }
}
