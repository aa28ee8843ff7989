// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! On-disk layout
//!
//! ```text
//! <data_dir>/
//!   live/
//!     shards/<name>.json      one shard per identifier
//!     wal/<txid>.wal          staged transactions
//!     unresolved.json         versions left in place for lack of a target
//!   wiped-<uuid>/             set aside by wipe_all, removed on open
//!   seeded.json               defaults were seeded once; survives wipes
//! ```

use std::path::{Path, PathBuf};

use super::shard::{shard_filename, Shard};
use crate::error::{MxdError, Result};
use crate::profile::ProfileId;

const LIVE_DIR: &str = "live";
const SHARDS_DIR: &str = "shards";
const WAL_DIR: &str = "wal";
const WIPED_PREFIX: &str = "wiped-";
const SEEDED_MARKER: &str = "seeded.json";
const UNRESOLVED_FILE: &str = "unresolved.json";

#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn live_dir(&self) -> PathBuf {
        self.root.join(LIVE_DIR)
    }

    pub fn shards_dir(&self) -> PathBuf {
        self.live_dir().join(SHARDS_DIR)
    }

    pub fn wal_dir(&self) -> PathBuf {
        self.live_dir().join(WAL_DIR)
    }

    pub fn shard_path(&self, identifier: &ProfileId) -> PathBuf {
        self.shards_dir().join(shard_filename(identifier))
    }

    pub fn unresolved_path(&self) -> PathBuf {
        self.live_dir().join(UNRESOLVED_FILE)
    }

    /// Written after the default profiles were seeded. Lives outside
    /// `live/` so a wipe does not bring the defaults back.
    pub fn seeded_marker(&self) -> PathBuf {
        self.root.join(SEEDED_MARKER)
    }

    /// A fresh name to move `live/` to during a wipe.
    pub(crate) fn aside_dir(&self) -> PathBuf {
        self.root
            .join(format!("{}{}", WIPED_PREFIX, uuid::Uuid::new_v4().simple()))
    }

    /// Create the live tree and delete trees left by an interrupted wipe.
    pub(crate) async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.shards_dir()).await?;
        tokio::fs::create_dir_all(self.wal_dir()).await?;

        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(WIPED_PREFIX) {
                let path = entry.path();
                match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => tracing::info!("Removed leftover wiped store {:?}", path),
                    Err(e) => tracing::warn!("Failed to remove wiped store {:?}: {}", path, e),
                }
            }
        }
        Ok(())
    }

    /// Delete shard temp files from an interrupted swap.
    pub(crate) async fn remove_temp_files(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(self.shards_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tmp") {
                tokio::fs::remove_file(&path).await?;
                tracing::warn!("Removed incomplete shard write {:?}", path);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Read one shard; `None` if the file does not exist.
    pub(crate) async fn load_shard(path: &Path) -> Result<Option<Shard>> {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let shard: Shard = serde_json::from_slice(&content)
            .map_err(|e| MxdError::Recovery(format!("shard {:?} is unreadable: {}", path, e)))?;
        if shard.format > Shard::FORMAT {
            return Err(MxdError::Recovery(format!(
                "shard {:?} has format {} newer than supported {}",
                path,
                shard.format,
                Shard::FORMAT
            )));
        }
        Ok(Some(shard))
    }

    /// Read every live shard.
    pub(crate) async fn load_shards(&self) -> Result<Vec<Shard>> {
        let mut shards = Vec::new();
        let mut entries = tokio::fs::read_dir(self.shards_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(shard) = Self::load_shard(&path).await? {
                    shards.push(shard);
                }
            }
        }
        Ok(shards)
    }
}
