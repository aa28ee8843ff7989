// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Per-identifier shard
//!
//! A shard holds every profile version and every ledger entry of one
//! identifier. It is the unit that the transaction writer swaps into place
//! with a single rename, so a profile version and the ledger entries that
//! reference it always become visible together.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ledger::{LedgerEntry, Outcome};
use super::wal::WalRecord;
use crate::profile::{Profile, ProfileId, ProfileStatus};

/// On-disk shard layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shard {
    /// Format version for compatibility
    pub format: u32,
    pub identifier: ProfileId,
    /// Profile versions, ascending
    pub profiles: Vec<Profile>,
    /// Ledger entries of this identifier, ascending by sequence
    pub entries: Vec<LedgerEntry>,
}

impl Shard {
    /// Current format version.
    pub const FORMAT: u32 = 1;

    pub fn new(identifier: ProfileId) -> Self {
        Self {
            format: Self::FORMAT,
            identifier,
            profiles: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Fold a staged transaction into the shard.
    ///
    /// Idempotent: versions and sequence numbers already present are
    /// skipped, which is what makes write-ahead replay safe to repeat.
    /// Returns whether anything changed.
    pub fn absorb(&mut self, record: &WalRecord) -> bool {
        let mut changed = false;

        if let Some(profile) = &record.profile {
            if self.profile(profile.version).is_none() {
                let mut committed = profile.clone();
                committed.status = ProfileStatus::Committed;
                let at = self
                    .profiles
                    .partition_point(|p| p.version < committed.version);
                self.profiles.insert(at, committed);
                changed = true;
            }
        }

        for entry in &record.entries {
            let at = self
                .entries
                .partition_point(|e| e.sequence < entry.sequence);
            if self.entries.get(at).map(|e| e.sequence) != Some(entry.sequence) {
                self.entries.insert(at, entry.clone());
                changed = true;
            }
        }

        changed
    }

    pub fn profile(&self, version: u64) -> Option<&Profile> {
        self.profiles
            .binary_search_by_key(&version, |p| p.version)
            .ok()
            .map(|i| &self.profiles[i])
    }

    /// Version currently in effect, derived from the most recent entry.
    pub fn effective_version(&self) -> Option<u64> {
        self.entries.last().and_then(LedgerEntry::effective_version)
    }

    pub fn max_version(&self) -> u64 {
        self.profiles.last().map(|p| p.version).unwrap_or(0)
    }

    pub fn max_sequence(&self) -> u64 {
        self.entries.last().map(|e| e.sequence).unwrap_or(0)
    }

    /// Whether a `reverted` entry names this version.
    pub fn is_reverted(&self, version: u64) -> bool {
        self.entries
            .iter()
            .any(|e| e.version == version && e.outcome == Outcome::Reverted)
    }

    /// Profile with its status derived from the ledger.
    pub fn resolved(&self, version: u64) -> Option<Profile> {
        self.profile(version).map(|p| {
            let mut profile = p.clone();
            if self.is_reverted(version) {
                profile.status = ProfileStatus::Reverted;
            }
            profile
        })
    }

    pub fn tail(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }

    pub fn last_good(&self) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.outcome == Outcome::ConfirmedGood)
    }
}

/// File name of the shard holding `identifier`.
///
/// App keys are free text, so the name combines a readable slug with a
/// digest of the exact key.
pub fn shard_filename(identifier: &ProfileId) -> String {
    match identifier {
        ProfileId::Global => "global.json".to_string(),
        ProfileId::App(key) => {
            let slug: String = key
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() {
                        c.to_ascii_lowercase()
                    } else {
                        '-'
                    }
                })
                .take(32)
                .collect();
            let digest = Sha256::digest(key.as_bytes());
            let hash: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
            format!("app-{}-{}.json", slug.trim_matches('-'), hash)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::SettingsMap;
    use crate::store::ledger::LedgerEntry;

    fn game() -> ProfileId {
        ProfileId::app("game1").unwrap()
    }

    fn record(seq: u64, version: u64, prior: Option<u64>, outcome: Outcome) -> WalRecord {
        let profile = if outcome == Outcome::Applied {
            Some(Profile::staged(game(), version, SettingsMap::new()))
        } else {
            None
        };
        WalRecord::new(
            game(),
            profile,
            vec![LedgerEntry::new(seq, game(), version, prior, outcome)],
        )
    }

    #[test]
    fn test_absorb_commits_profile() {
        let mut shard = Shard::new(game());
        assert!(shard.absorb(&record(1, 1, None, Outcome::Applied)));
        assert_eq!(shard.profiles.len(), 1);
        assert_eq!(shard.profiles[0].status, ProfileStatus::Committed);
        assert_eq!(shard.effective_version(), Some(1));
    }

    #[test]
    fn test_absorb_is_idempotent() {
        let mut shard = Shard::new(game());
        let rec = record(1, 1, None, Outcome::Applied);
        assert!(shard.absorb(&rec));
        assert!(!shard.absorb(&rec));
        assert_eq!(shard.profiles.len(), 1);
        assert_eq!(shard.entries.len(), 1);
    }

    #[test]
    fn test_effective_version_after_revert_is_prior() {
        let mut shard = Shard::new(game());
        shard.absorb(&record(1, 1, None, Outcome::Applied));
        shard.absorb(&record(2, 1, None, Outcome::ConfirmedGood));
        shard.absorb(&record(3, 2, Some(1), Outcome::Applied));
        assert_eq!(shard.effective_version(), Some(2));

        shard.absorb(&record(4, 2, Some(1), Outcome::Reverted));
        assert_eq!(shard.effective_version(), Some(1));
        assert!(shard.is_reverted(2));
        assert_eq!(
            shard.resolved(2).map(|p| p.status),
            Some(ProfileStatus::Reverted)
        );
        assert_eq!(shard.last_good().map(|e| e.version), Some(1));
    }

    #[test]
    fn test_reverting_first_apply_leaves_nothing_effective() {
        let mut shard = Shard::new(game());
        shard.absorb(&record(1, 1, None, Outcome::Applied));
        shard.absorb(&record(2, 1, None, Outcome::Reverted));
        assert_eq!(shard.effective_version(), None);
    }

    #[test]
    fn test_shard_filename() {
        assert_eq!(shard_filename(&ProfileId::Global), "global.json");
        let name = shard_filename(&ProfileId::app("Cyberpunk 2077").unwrap());
        assert!(name.starts_with("app-cyberpunk-2077-"));
        assert!(name.ends_with(".json"));
        assert_ne!(
            shard_filename(&ProfileId::app("a/b").unwrap()),
            shard_filename(&ProfileId::app("a-b").unwrap())
        );
    }
}
