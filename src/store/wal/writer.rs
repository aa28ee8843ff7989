// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Transaction writer
//!
//! The only component that mutates profiles or the ledger. Commit
//! protocol:
//!
//! 1. stage the record in `wal/<txid>.wal`, fsync the file and the
//!    directory (durability barrier);
//! 2. write the identifier's next shard to a temp file, fsync, rename it
//!    over the live shard (the atomic switch);
//! 3. delete the staged record.
//!
//! A failure before the barrier leaves nothing observable. After the
//! barrier the transaction is durable: if the swap fails the in-memory view
//! still advances and the staged record is replayed by [`recover`] on the
//! next open.

use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use super::{wal_filename, CommitReceipt, Transaction, WalReader, WalRecord};
use crate::error::{MxdError, Result};
use crate::store::layout::StoreLayout;
use crate::store::ledger::LedgerEntry;
use crate::store::locks::IdentifierGuard;
use crate::store::shard::Shard;
use crate::store::Shared;

/// What recovery did on open
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Staged transactions whose swap had not happened and was completed
    pub replayed: usize,
    /// Staged transactions already visible in their shard
    pub already_applied: usize,
    /// Torn records written before the durability barrier
    pub discarded: usize,
    /// Shard temp files left by an interrupted swap
    pub temp_files_removed: usize,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// Writer for atomic profile + ledger transactions
#[derive(Clone)]
pub struct TransactionWriter {
    shared: Arc<Shared>,
}

impl TransactionWriter {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Commit a transaction for the identifier held by `guard`.
    pub async fn commit(&self, guard: &IdentifierGuard, tx: Transaction) -> Result<CommitReceipt> {
        let _gate = self.shared.gate.read().await;
        let record = self.stage(guard, tx).await?;
        Ok(self.complete(record).await)
    }

    /// Validate, assign sequence numbers and stage durably. Once this
    /// returns `Ok` the transaction will take effect exactly once.
    pub(crate) async fn stage(&self, guard: &IdentifierGuard, tx: Transaction) -> Result<WalRecord> {
        if guard.identifier() != &tx.identifier {
            return Err(MxdError::InvalidInput(format!(
                "transaction for '{}' committed under the lock of '{}'",
                tx.identifier,
                guard.identifier()
            )));
        }
        if tx.drafts.is_empty() {
            return Err(MxdError::InvalidInput(
                "transaction has no ledger entries".to_string(),
            ));
        }
        if let Some(profile) = &tx.profile {
            if profile.identifier != tx.identifier {
                return Err(MxdError::InvalidInput(format!(
                    "profile of '{}' staged in a transaction for '{}'",
                    profile.identifier, tx.identifier
                )));
            }
        }

        let record = self.seal(tx).await;
        let wal_dir = self.shared.layout.wal_dir();
        let path = wal_dir.join(wal_filename(record.txid));
        let bytes = record.encode()?;

        let written: std::io::Result<()> = async {
            let mut file = tokio::fs::File::create(&path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            sync_dir(&wal_dir).await
        }
        .await;

        if let Err(e) = written {
            if let Err(rm) = tokio::fs::remove_file(&path).await {
                if rm.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partial WAL record {:?}: {}", path, rm);
                }
            }
            return Err(e.into());
        }

        Ok(record)
    }

    /// Assign consecutive sequence numbers and timestamps.
    async fn seal(&self, tx: Transaction) -> WalRecord {
        let mut tables = self.shared.tables.write().await;
        let entries: Vec<LedgerEntry> = tx
            .drafts
            .iter()
            .map(|draft| {
                let sequence = tables.next_sequence;
                tables.next_sequence += 1;
                LedgerEntry::new(
                    sequence,
                    tx.identifier.clone(),
                    draft.version,
                    draft.prior_version,
                    draft.outcome,
                )
            })
            .collect();
        WalRecord::new(tx.identifier, tx.profile, entries)
    }

    /// Swap the staged record into the live shard and publish it.
    async fn complete(&self, record: WalRecord) -> CommitReceipt {
        let mut shard = {
            let tables = self.shared.tables.read().await;
            tables
                .shards
                .get(&record.identifier)
                .cloned()
                .unwrap_or_else(|| Shard::new(record.identifier.clone()))
        };
        shard.absorb(&record);

        match self.swap(&shard).await {
            Ok(()) => self.discard(record.txid).await,
            Err(e) => tracing::error!(
                "Swap of transaction {} for '{}' failed after the durability barrier, \
                 it will be replayed on next open: {}",
                record.txid,
                record.identifier,
                e
            ),
        }

        {
            let mut tables = self.shared.tables.write().await;
            tables.shards.insert(record.identifier.clone(), shard);
        }

        tracing::info!(
            identifier = %record.identifier,
            txid = record.txid,
            entries = record.entries.len(),
            "Committed transaction"
        );

        CommitReceipt {
            identifier: record.identifier,
            version: record.profile.map(|p| p.version),
            first_sequence: record.txid,
            entries: record.entries,
        }
    }

    async fn swap(&self, shard: &Shard) -> Result<()> {
        let path = self.shared.layout.shard_path(&shard.identifier);
        let bytes = serde_json::to_vec_pretty(shard)?;
        write_atomic(&path, &bytes).await?;
        Ok(())
    }

    async fn discard(&self, txid: u64) {
        let path = self.shared.layout.wal_dir().join(wal_filename(txid));
        if let Err(e) = tokio::fs::remove_file(&path).await {
            tracing::warn!("Failed to discard WAL record {:?}: {}", path, e);
        }
    }
}

/// Replay every staged transaction left by a previous process.
pub(crate) async fn recover(layout: &StoreLayout) -> Result<RecoveryReport> {
    let mut report = RecoveryReport {
        temp_files_removed: layout.remove_temp_files().await.map_err(fatal)?,
        ..RecoveryReport::default()
    };

    let reader = WalReader::new(layout.wal_dir());
    let staged = reader.scan().await.map_err(fatal)?;

    for (path, record) in staged {
        match record {
            Some(record) => {
                let shard_path = layout.shard_path(&record.identifier);
                let mut shard = StoreLayout::load_shard(&shard_path)
                    .await
                    .map_err(fatal)?
                    .unwrap_or_else(|| Shard::new(record.identifier.clone()));

                if shard.absorb(&record) {
                    let bytes =
                        serde_json::to_vec_pretty(&shard).map_err(|e| fatal(e.into()))?;
                    write_atomic(&shard_path, &bytes)
                        .await
                        .map_err(|e| fatal(e.into()))?;
                    tracing::info!(
                        identifier = %record.identifier,
                        txid = record.txid,
                        "Replayed staged transaction"
                    );
                    report.replayed += 1;
                } else {
                    report.already_applied += 1;
                }
            }
            None => {
                tracing::warn!("Discarding torn WAL record {:?}", path);
                report.discarded += 1;
            }
        }

        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| fatal(e.into()))?;
    }

    if !report.is_clean() {
        sync_dir(&layout.wal_dir())
            .await
            .map_err(|e| fatal(e.into()))?;
    }

    Ok(report)
}

fn fatal(err: MxdError) -> MxdError {
    match err {
        MxdError::Recovery(_) => err,
        other => MxdError::Recovery(other.to_string()),
    }
}

/// Write a file atomically: temp file, fsync, rename, fsync the directory.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension("json.tmp");

    let mut file = tokio::fs::File::create(&temp_path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&temp_path, path).await?;
    if let Some(parent) = path.parent() {
        sync_dir(parent).await?;
    }
    Ok(())
}

/// Persist directory entries (creates, renames, deletes).
pub(crate) async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        tokio::fs::File::open(dir).await?.sync_all().await?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}
