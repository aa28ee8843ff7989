// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Write-ahead records for the transaction writer
//!
//! A transaction (an optional new profile version plus one or more ledger
//! entries of the same identifier) is first staged as a checksummed record
//! in `wal/`, then swapped into the live shard, then discarded. A record
//! that survives a crash is replayed on the next open.

mod reader;
mod writer;

pub use reader::WalReader;
pub use writer::{RecoveryReport, TransactionWriter};

pub(crate) use writer::{recover, sync_dir, write_atomic};

use serde::{Deserialize, Serialize};

use super::ledger::{EntryDraft, LedgerEntry};
use crate::error::Result;
use crate::profile::{Profile, ProfileId};

/// A staged transaction
///
/// On disk a record is framed as `<checksum>\n<json>`, the checksum being
/// an FNV-1a hash of the JSON bytes exactly as written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    /// Transaction id: the sequence number of the first entry
    pub txid: u64,
    pub identifier: ProfileId,
    /// New profile version, if the transaction creates one
    pub profile: Option<Profile>,
    pub entries: Vec<LedgerEntry>,
}

impl WalRecord {
    pub fn new(identifier: ProfileId, profile: Option<Profile>, entries: Vec<LedgerEntry>) -> Self {
        let txid = entries.first().map(|e| e.sequence).unwrap_or(0);
        Self {
            txid,
            identifier,
            profile,
            entries,
        }
    }

    /// Frame the record for the WAL.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(self)?;
        let mut framed = format!("{:08x}\n", checksum(&body)).into_bytes();
        framed.extend_from_slice(&body);
        Ok(framed)
    }

    /// Parse a framed record, rejecting anything torn, altered or
    /// inconsistent.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        let newline = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or("missing checksum header")?;
        let (header, body) = (&bytes[..newline], &bytes[newline + 1..]);
        let expected = std::str::from_utf8(header)
            .ok()
            .and_then(|h| u32::from_str_radix(h, 16).ok())
            .ok_or("malformed checksum header")?;
        let actual = checksum(body);
        if actual != expected {
            return Err(format!(
                "checksum mismatch: header {:08x}, content {:08x}",
                expected, actual
            ));
        }

        let record: WalRecord = serde_json::from_slice(body).map_err(|e| e.to_string())?;
        if !record.is_consistent() {
            return Err("record is empty or mixes identifiers".to_string());
        }
        Ok(record)
    }

    /// Every part names the record's identifier and there is at least one
    /// entry.
    pub fn is_consistent(&self) -> bool {
        !self.entries.is_empty()
            && self.entries.iter().all(|e| e.identifier == self.identifier)
            && self
                .profile
                .as_ref()
                .map_or(true, |p| p.identifier == self.identifier)
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |hash, &byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// A transaction handed to [`TransactionWriter::commit`]
#[derive(Debug, Clone)]
pub struct Transaction {
    pub identifier: ProfileId,
    pub profile: Option<Profile>,
    pub drafts: Vec<EntryDraft>,
}

impl Transaction {
    pub fn new(identifier: ProfileId) -> Self {
        Self {
            identifier,
            profile: None,
            drafts: Vec::new(),
        }
    }

    /// Attach a staged profile version.
    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Add a ledger entry; entries receive consecutive sequence numbers in
    /// the order they are added.
    pub fn entry(mut self, draft: EntryDraft) -> Self {
        self.drafts.push(draft);
        self
    }
}

/// What a committed transaction produced
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub identifier: ProfileId,
    /// Version created by the transaction, if any
    pub version: Option<u64>,
    pub first_sequence: u64,
    pub entries: Vec<LedgerEntry>,
}

impl CommitReceipt {
    /// The last entry written, which decides the effective version.
    pub fn last_entry(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }
}

/// WAL file naming
pub fn wal_filename(txid: u64) -> String {
    format!("{:08}.wal", txid)
}

/// Parse the transaction id from a WAL filename
pub fn parse_wal_filename(filename: &str) -> Option<u64> {
    filename
        .strip_suffix(".wal")
        .and_then(|s| s.parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{SettingValue, SettingsMap};
    use crate::store::ledger::Outcome;

    fn sample() -> WalRecord {
        let id = ProfileId::app("game1").unwrap();
        WalRecord::new(
            id.clone(),
            Some(Profile::staged(id.clone(), 1, SettingsMap::new())),
            vec![LedgerEntry::new(7, id, 1, None, Outcome::Applied)],
        )
    }

    #[test]
    fn test_txid_is_first_sequence() {
        assert_eq!(sample().txid, 7);
    }

    #[test]
    fn test_encode_decode_keeps_floats_exact() {
        let id = ProfileId::app("game1").unwrap();
        let mut settings = SettingsMap::new();
        settings.insert(
            "render_scale".to_string(),
            SettingValue::Float(0.940_027_342_123_589_3),
        );
        let record = WalRecord::new(
            id.clone(),
            Some(Profile::staged(id.clone(), 1, settings.clone())),
            vec![LedgerEntry::new(1, id, 1, None, Outcome::Applied)],
        );

        let decoded = WalRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded.profile.unwrap().settings, settings);
    }

    #[test]
    fn test_decode_detects_altered_content() {
        let framed = String::from_utf8(sample().encode().unwrap()).unwrap();
        let altered = framed.replacen("\"version\":1", "\"version\":9", 1);
        assert_ne!(framed, altered);
        assert!(WalRecord::decode(altered.as_bytes()).is_err());
    }

    #[test]
    fn test_decode_rejects_torn_and_headerless() {
        let framed = sample().encode().unwrap();
        assert!(WalRecord::decode(&framed[..framed.len() / 2]).is_err());
        assert!(WalRecord::decode(&serde_json::to_vec(&sample()).unwrap()).is_err());
    }

    #[test]
    fn test_mixed_identifiers_are_inconsistent() {
        let mut record = sample();
        assert!(record.is_consistent());
        record.entries[0].identifier = ProfileId::Global;
        assert!(!record.is_consistent());
        assert!(WalRecord::decode(&record.encode().unwrap()).is_err());
    }

    #[test]
    fn test_wal_filename_roundtrip() {
        assert_eq!(wal_filename(42), "00000042.wal");
        assert_eq!(parse_wal_filename("00000042.wal"), Some(42));
        assert_eq!(parse_wal_filename("00000042.wal.tmp"), None);
        assert_eq!(parse_wal_filename("notes.txt"), None);
    }
}
