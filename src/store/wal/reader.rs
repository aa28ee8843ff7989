// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! WAL reader for recovery
//!
//! Lists staged records oldest first. A record that cannot be parsed or
//! fails its checksum was torn before the durability barrier and is
//! reported as `None`; the caller discards it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{parse_wal_filename, WalRecord};
use crate::error::Result;

/// Scans the staged records of one store
pub struct WalReader {
    wal_dir: PathBuf,
}

impl WalReader {
    pub fn new(wal_dir: PathBuf) -> Self {
        Self { wal_dir }
    }

    /// Every staged record, ascending by transaction id.
    ///
    /// IO errors propagate: a WAL directory that cannot be read means the
    /// durable medium itself is unreadable.
    pub async fn scan(&self) -> Result<Vec<(PathBuf, Option<WalRecord>)>> {
        let mut staged = self.staged_files().await?;
        staged.sort_by_key(|(txid, _)| *txid);

        let mut records = Vec::with_capacity(staged.len());
        for (_, path) in staged {
            let record = Self::decode(&path).await?;
            records.push((path, record));
        }
        Ok(records)
    }

    /// Number of staged records, torn ones included.
    pub async fn staged_count(&self) -> Result<usize> {
        Ok(self.staged_files().await?.len())
    }

    /// `(txid, path)` of every file named like a WAL record.
    async fn staged_files(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut dir = match tokio::fs::read_dir(&self.wal_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut staged = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if let Some(txid) = parse_wal_filename(&entry.file_name().to_string_lossy()) {
                staged.push((txid, entry.path()));
            }
        }
        Ok(staged)
    }

    async fn decode(path: &Path) -> Result<Option<WalRecord>> {
        let bytes = tokio::fs::read(path).await?;
        match WalRecord::decode(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(reason) => {
                tracing::warn!("WAL record {:?} is unusable: {}", path, reason);
                Ok(None)
            }
        }
    }
}
