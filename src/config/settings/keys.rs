// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{MxdError, Result};

use super::Settings;

/// Keys accepted by `mxd settings get` and `mxd settings set`.
pub const SETTING_KEYS: &[&str] = &[
    "store.data_dir",
    "store.seed_defaults",
    "monitor.evaluation_window_secs",
    "monitor.settle_secs",
    "monitor.check_interval_secs",
    "monitor.acceptance_threshold",
    "monitor.resume_on_open",
    "schema.extensions_path",
];

fn unknown(key: &str) -> MxdError {
    MxdError::InvalidInput(format!(
        "Unknown setting: {}. Known settings: {}",
        key,
        SETTING_KEYS.join(", ")
    ))
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MxdError::InvalidInput(format!("Invalid value for {}: '{}'", key, value)))
}

/// Empty or `none` clears an optional path.
fn optional_path(value: &str) -> Option<PathBuf> {
    match value.trim() {
        "" | "none" => None,
        path => Some(PathBuf::from(path)),
    }
}

fn path_label(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map_or_else(|| "none".to_string(), |p| p.display().to_string())
}

impl Settings {
    /// Current value of a dotted key, rendered for display.
    pub fn get_key(&self, key: &str) -> Result<String> {
        let value = match key {
            "store.data_dir" => path_label(&self.store.data_dir),
            "store.seed_defaults" => self.store.seed_defaults.to_string(),
            "monitor.evaluation_window_secs" => self.monitor.evaluation_window_secs.to_string(),
            "monitor.settle_secs" => self.monitor.settle_secs.to_string(),
            "monitor.check_interval_secs" => self.monitor.check_interval_secs.to_string(),
            "monitor.acceptance_threshold" => self.monitor.acceptance_threshold.to_string(),
            "monitor.resume_on_open" => self.monitor.resume_on_open.to_string(),
            "schema.extensions_path" => path_label(&self.schema.extensions_path),
            _ => return Err(unknown(key)),
        };
        Ok(value)
    }

    /// Parse `value` into the field named by `key`. The settings are left
    /// unchanged when the result would not validate.
    pub fn set_key(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "store.data_dir" => updated.store.data_dir = optional_path(value),
            "store.seed_defaults" => updated.store.seed_defaults = parse(key, value)?,
            "monitor.evaluation_window_secs" => {
                updated.monitor.evaluation_window_secs = parse(key, value)?
            }
            "monitor.settle_secs" => updated.monitor.settle_secs = parse(key, value)?,
            "monitor.check_interval_secs" => {
                updated.monitor.check_interval_secs = parse(key, value)?
            }
            "monitor.acceptance_threshold" => {
                updated.monitor.acceptance_threshold = parse(key, value)?
            }
            "monitor.resume_on_open" => updated.monitor.resume_on_open = parse(key, value)?,
            "schema.extensions_path" => updated.schema.extensions_path = optional_path(value),
            _ => return Err(unknown(key)),
        }
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}
