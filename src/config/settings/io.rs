// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Result;

use super::migration;
use super::Settings;

impl Settings {
    /// `settings.json` under the mxd home directory.
    pub fn default_path() -> PathBuf {
        Self::mxd_home().join("settings.json")
    }

    /// Read and migrate a settings file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let stored: serde_json::Value = serde_json::from_str(&content)?;
        Ok(serde_json::from_value(migration::migrate_on_load(stored))?)
    }

    /// Write settings to `path`. Keys this version does not know about
    /// (hand edits, newer releases) are kept.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let ours = serde_json::to_value(self)?;
        let document = match Self::existing_document(path)? {
            Some(existing) => migration::deep_merge(existing, ours),
            None => ours,
        };
        Self::write_document(path, &document)
    }

    /// Write settings to `path`, dropping anything else the file held.
    pub fn save_clean_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        Self::write_document(path, &serde_json::to_value(self)?)
    }

    fn write_document(path: &Path, document: &serde_json::Value) -> Result<()> {
        // A crash leaves either the old file or the new one.
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, serde_json::to_string_pretty(document)?)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// The current file as JSON, `None` when absent or unreadable.
    fn existing_document(path: &Path) -> Result<Option<serde_json::Value>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!("Overwriting unreadable settings file {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    /// `$MXD_HOME`, or `~/.mxd`.
    pub fn mxd_home() -> PathBuf {
        match std::env::var_os("MXD_HOME") {
            Some(home) => PathBuf::from(home),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".mxd"),
        }
    }

    /// Store directory, configured or under the home directory.
    pub fn data_dir(&self) -> PathBuf {
        self.store
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::mxd_home().join("store"))
    }
}
