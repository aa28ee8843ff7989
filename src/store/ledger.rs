// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! History ledger
//!
//! Append-only record of every apply / confirm / revert transition. Entries
//! are never edited: a later outcome for the same version is a new entry
//! with a higher sequence number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::locks::IdentifierGuard;
use super::wal::{Transaction, TransactionWriter};
use super::Shared;
use crate::error::Result;
use crate::profile::ProfileId;

/// Outcome recorded by a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    /// Version applied, evaluation pending
    Applied,
    /// Version confirmed acceptable; candidate for "last known good"
    ConfirmedGood,
    /// Version undone; the prior version is effective again
    Reverted,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::ConfirmedGood => "confirmed-good",
            Outcome::Reverted => "reverted",
        }
    }
}

/// One ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Store-wide, strictly increasing
    pub sequence: u64,
    pub identifier: ProfileId,
    /// Version this entry is about
    pub version: u64,
    /// Version that was effective before `version` was applied
    pub prior_version: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
}

impl LedgerEntry {
    pub(crate) fn new(
        sequence: u64,
        identifier: ProfileId,
        version: u64,
        prior_version: Option<u64>,
        outcome: Outcome,
    ) -> Self {
        Self {
            sequence,
            identifier,
            version,
            prior_version,
            timestamp: Utc::now(),
            outcome,
        }
    }

    /// Version in effect if this is the most recent entry of its identifier.
    pub fn effective_version(&self) -> Option<u64> {
        match self.outcome {
            Outcome::Reverted => self.prior_version,
            Outcome::Applied | Outcome::ConfirmedGood => Some(self.version),
        }
    }
}

/// An entry before the writer assigns its sequence number and timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryDraft {
    pub version: u64,
    pub prior_version: Option<u64>,
    pub outcome: Outcome,
}

impl EntryDraft {
    pub fn new(version: u64, prior_version: Option<u64>, outcome: Outcome) -> Self {
        Self {
            version,
            prior_version,
            outcome,
        }
    }
}

/// Read access to the ledger, plus appends routed through the writer
#[derive(Clone)]
pub struct HistoryLedger {
    shared: Arc<Shared>,
    writer: TransactionWriter,
}

impl HistoryLedger {
    pub(crate) fn new(shared: Arc<Shared>, writer: TransactionWriter) -> Self {
        Self { shared, writer }
    }

    /// Append one entry as its own transaction and return its sequence.
    pub async fn append(&self, guard: &IdentifierGuard, draft: EntryDraft) -> Result<u64> {
        let tx = Transaction::new(guard.identifier().clone()).entry(draft);
        let receipt = self.writer.commit(guard, tx).await?;
        Ok(receipt.first_sequence)
    }

    /// Most recent confirmed-good entry of an identifier.
    pub async fn last_good(&self, identifier: &ProfileId) -> Option<LedgerEntry> {
        let tables = self.shared.tables.read().await;
        tables
            .shards
            .get(identifier)
            .and_then(|s| s.last_good())
            .cloned()
    }

    /// Most recent entry of an identifier regardless of outcome.
    pub async fn tail(&self, identifier: &ProfileId) -> Option<LedgerEntry> {
        let tables = self.shared.tables.read().await;
        tables
            .shards
            .get(identifier)
            .and_then(|s| s.tail())
            .cloned()
    }

    /// All entries of an identifier, ascending by sequence.
    pub async fn entries(&self, identifier: &ProfileId) -> Vec<LedgerEntry> {
        let tables = self.shared.tables.read().await;
        tables
            .shards
            .get(identifier)
            .map(|s| s.entries.clone())
            .unwrap_or_default()
    }

    /// The whole ledger, ascending by sequence.
    pub async fn all(&self) -> Vec<LedgerEntry> {
        let tables = self.shared.tables.read().await;
        let mut entries: Vec<LedgerEntry> = tables
            .shards
            .values()
            .flat_map(|s| s.entries.iter().cloned())
            .collect();
        entries.sort_by_key(|e| e.sequence);
        entries
    }
}
