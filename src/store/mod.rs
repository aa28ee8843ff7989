// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Profile & rollback store
//!
//! Durable, versioned profiles plus the append-only ledger of their
//! transitions. All mutation goes through [`TransactionWriter`]; readers
//! see an in-memory snapshot that is replaced only after the on-disk
//! switch, so they observe either the state before a transaction or the
//! state after it.

pub mod bundle;
pub mod layout;
pub mod ledger;
mod locks;
pub mod profiles;
pub mod shard;
pub mod wal;

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub use bundle::{ExportBundle, ExportedProfile};
pub use layout::StoreLayout;
pub use ledger::{EntryDraft, HistoryLedger, LedgerEntry, Outcome};
pub use locks::IdentifierGuard;
pub use profiles::ProfileStore;
pub use shard::Shard;
pub use wal::{CommitReceipt, RecoveryReport, Transaction, TransactionWriter};

use crate::config::Settings;
use crate::error::{MxdError, Result};
use crate::profile::defaults::default_profiles;
use crate::profile::{Profile, ProfileId, SchemaRegistry};
use locks::KeyedLocks;

/// In-memory view of every live shard
pub(crate) struct Tables {
    pub(crate) shards: HashMap<ProfileId, Shard>,
    /// Next ledger sequence number, store-wide
    pub(crate) next_sequence: u64,
}

pub(crate) struct Shared {
    pub(crate) layout: StoreLayout,
    pub(crate) tables: RwLock<Tables>,
    /// Commits hold it shared; `wipe_all` holds it exclusively.
    pub(crate) gate: RwLock<()>,
    pub(crate) schema: SchemaRegistry,
    /// Highest version handed out by `put` per identifier
    pub(crate) reservations: Mutex<HashMap<ProfileId, u64>>,
    pub(crate) locks: KeyedLocks,
    /// Serializes rewrites of the unresolved list
    pub(crate) notes: Mutex<()>,
}

/// Handle to an open store
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
    profiles: ProfileStore,
    ledger: HistoryLedger,
    writer: TransactionWriter,
    recovery: RecoveryReport,
}

impl Store {
    /// Open (or create) the store under `data_dir`.
    ///
    /// Replays staged transactions first; a [`MxdError::Recovery`] means
    /// the store could not be made consistent and must not be used.
    pub async fn open(data_dir: impl AsRef<Path>, schema: SchemaRegistry) -> Result<Self> {
        let layout = StoreLayout::new(data_dir.as_ref());
        layout.prepare().await?;

        let recovery = wal::recover(&layout).await?;
        if !recovery.is_clean() {
            tracing::info!(
                replayed = recovery.replayed,
                already_applied = recovery.already_applied,
                discarded = recovery.discarded,
                "Recovered store at {:?}",
                layout.root()
            );
        }

        let shards = layout.load_shards().await.map_err(|e| match e {
            MxdError::Io(io) => MxdError::Recovery(format!("cannot read shards: {}", io)),
            other => other,
        })?;
        let next_sequence = shards.iter().map(Shard::max_sequence).max().unwrap_or(0) + 1;
        let shards: HashMap<ProfileId, Shard> = shards
            .into_iter()
            .map(|s| (s.identifier.clone(), s))
            .collect();

        tracing::debug!(
            identifiers = shards.len(),
            next_sequence,
            "Opened store at {:?}",
            layout.root()
        );

        let shared = Arc::new(Shared {
            layout,
            tables: RwLock::new(Tables {
                shards,
                next_sequence,
            }),
            gate: RwLock::new(()),
            schema,
            reservations: Mutex::new(HashMap::new()),
            locks: KeyedLocks::default(),
            notes: Mutex::new(()),
        });

        let writer = TransactionWriter::new(shared.clone());
        Ok(Self {
            profiles: ProfileStore::new(shared.clone()),
            ledger: HistoryLedger::new(shared.clone(), writer.clone()),
            writer,
            shared,
            recovery,
        })
    }

    /// Open the store described by `settings`.
    ///
    /// With seeding enabled the default profiles are committed the first
    /// time; once seeded (even if later wiped) they are not brought back.
    pub async fn open_with_settings(settings: &Settings) -> Result<Self> {
        let store = Self::open(settings.data_dir(), settings.schema_registry()?).await?;
        if settings.store.seed_defaults && !store.defaults_seeded().await? {
            store.seed_defaults().await?;
        }
        Ok(store)
    }

    /// Serialize with every other operation on `identifier`.
    pub async fn lock(&self, identifier: &ProfileId) -> IdentifierGuard {
        self.shared.locks.acquire(identifier).await
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    pub fn writer(&self) -> &TransactionWriter {
        &self.writer
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.shared.schema
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.shared.layout
    }

    /// What recovery did when this store was opened.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Effective profile of `identifier`.
    pub async fn current_effective(&self, identifier: &ProfileId) -> Result<Profile> {
        self.profiles.get(identifier, None).await
    }

    /// Versions whose revert found nothing confirmed-good to restore.
    pub async fn unresolved(&self) -> Result<BTreeMap<ProfileId, u64>> {
        match tokio::fs::read(self.shared.layout.unresolved_path()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remember that `version` stays in effect without a rollback target,
    /// so later opens do not report it again. A wipe forgets it.
    pub async fn note_unresolved(&self, identifier: &ProfileId, version: u64) -> Result<()> {
        let _notes = self.shared.notes.lock().await;
        let mut unresolved = self.unresolved().await?;
        if unresolved.insert(identifier.clone(), version) == Some(version) {
            return Ok(());
        }
        let bytes = serde_json::to_vec_pretty(&unresolved)?;
        wal::write_atomic(&self.shared.layout.unresolved_path(), &bytes).await?;
        Ok(())
    }

    /// Whether the defaults were seeded into this store before.
    pub async fn defaults_seeded(&self) -> Result<bool> {
        match tokio::fs::metadata(self.shared.layout.seeded_marker()).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Commit the built-in defaults for identifiers that have no history.
    ///
    /// Each default is recorded as applied and confirmed-good in one
    /// transaction so it can serve as a rollback target right away.
    pub async fn seed_defaults(&self) -> Result<Vec<ProfileId>> {
        let mut seeded = Vec::new();
        for (identifier, settings) in default_profiles() {
            let guard = self.lock(&identifier).await;
            if self.ledger.tail(&identifier).await.is_some() {
                continue;
            }
            let staged = self.profiles.put(&identifier, settings).await?;
            let version = staged.version;
            let tx = Transaction::new(identifier.clone())
                .with_profile(staged)
                .entry(EntryDraft::new(version, None, Outcome::Applied))
                .entry(EntryDraft::new(version, None, Outcome::ConfirmedGood));
            self.writer.commit(&guard, tx).await?;
            tracing::info!(identifier = %identifier, "Seeded default profile");
            seeded.push(identifier);
        }

        let marker = serde_json::to_vec_pretty(&serde_json::json!({ "seeded_at": Utc::now() }))?;
        wal::write_atomic(&self.shared.layout.seeded_marker(), &marker).await?;
        Ok(seeded)
    }

    /// Clear every profile and the whole ledger as one unit.
    ///
    /// The live tree is renamed aside in a single step, so after a crash
    /// the store is either fully intact or fully empty. The aside tree is
    /// deleted afterwards, or on the next open.
    pub async fn wipe_all(&self) -> Result<()> {
        let _gate = self.shared.gate.write().await;
        let mut tables = self.shared.tables.write().await;
        let layout = &self.shared.layout;

        let live = layout.live_dir();
        let aside = layout.aside_dir();
        tokio::fs::rename(&live, &aside).await?;

        let recreated: std::io::Result<()> = async {
            tokio::fs::create_dir_all(layout.shards_dir()).await?;
            tokio::fs::create_dir_all(layout.wal_dir()).await?;
            wal::sync_dir(layout.root()).await
        }
        .await;
        if let Err(e) = recreated {
            // Put the old tree back; the wipe did not happen.
            if let Err(cleanup) = tokio::fs::remove_dir_all(&live).await {
                tracing::warn!("Failed to remove partial live tree {:?}: {}", live, cleanup);
            }
            tokio::fs::rename(&aside, &live).await?;
            return Err(e.into());
        }

        tables.shards.clear();
        tables.next_sequence = 1;
        self.shared.reservations.lock().await.clear();
        drop(tables);

        tracing::info!("Wiped store at {:?}", layout.root());

        if let Err(e) = tokio::fs::remove_dir_all(&aside).await {
            tracing::warn!("Failed to delete wiped store {:?}: {}", aside, e);
        }
        Ok(())
    }

    /// Effective profile of every identifier, for export.
    pub async fn snapshot(&self) -> Vec<ExportedProfile> {
        let tables = self.shared.tables.read().await;
        let mut profiles: Vec<ExportedProfile> = tables
            .shards
            .values()
            .filter_map(|shard| {
                let version = shard.effective_version()?;
                let profile = shard.profile(version)?;
                Some(ExportedProfile {
                    identifier: shard.identifier.clone(),
                    version,
                    settings: profile.settings.clone(),
                })
            })
            .collect();
        profiles.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        profiles
    }

    /// Write the effective profiles to a JSON bundle; returns how many.
    pub async fn export_to(&self, path: &Path) -> Result<usize> {
        let bundle = ExportBundle::new(self.snapshot().await);
        let bytes = serde_json::to_vec_pretty(&bundle)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        wal::write_atomic(path, &bytes).await?;
        tracing::info!("Exported {} profiles to {:?}", bundle.profiles.len(), path);
        Ok(bundle.profiles.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{SettingValue, SettingsMap};
    use tempfile::TempDir;

    fn game() -> ProfileId {
        ProfileId::app("game1").unwrap()
    }

    async fn apply(store: &Store, cap: i64) -> u64 {
        let guard = store.lock(&game()).await;
        let mut settings = SettingsMap::new();
        settings.insert("fps_cap".to_string(), SettingValue::Integer(cap));
        let prior = store.profiles().effective_version(&game()).await;
        let staged = store.profiles().put(&game(), settings).await.unwrap();
        let version = staged.version;
        store
            .writer()
            .commit(
                &guard,
                Transaction::new(game())
                    .with_profile(staged)
                    .entry(EntryDraft::new(version, prior, Outcome::Applied)),
            )
            .await
            .unwrap();
        version
    }

    #[tokio::test]
    async fn test_reopen_preserves_state_and_sequence() {
        let dir = TempDir::new().unwrap();
        let last_seq = {
            let store = Store::open(dir.path(), SchemaRegistry::builtin()).await.unwrap();
            apply(&store, 60).await;
            apply(&store, 90).await;
            store.ledger().tail(&game()).await.unwrap().sequence
        };

        let store = Store::open(dir.path(), SchemaRegistry::builtin()).await.unwrap();
        assert!(store.recovery_report().is_clean());
        assert_eq!(store.profiles().effective_version(&game()).await, Some(2));

        let next = apply(&store, 120).await;
        assert_eq!(next, 3);
        assert!(store.ledger().tail(&game()).await.unwrap().sequence > last_seq);
    }

    #[tokio::test]
    async fn test_seed_defaults_commits_confirmed_good_once() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), SchemaRegistry::builtin()).await.unwrap();

        let seeded = store.seed_defaults().await.unwrap();
        assert_eq!(seeded.len(), default_profiles().len());
        for id in &seeded {
            let good = store.ledger().last_good(id).await.unwrap();
            assert_eq!(good.version, 1);
            assert_eq!(store.ledger().entries(id).await.len(), 2);
        }

        assert!(store.seed_defaults().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wipe_all_clears_everything() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), SchemaRegistry::builtin()).await.unwrap();
        apply(&store, 60).await;
        store.seed_defaults().await.unwrap();

        store.wipe_all().await.unwrap();

        assert!(matches!(
            store.current_effective(&game()).await,
            Err(MxdError::NotFound(_))
        ));
        assert!(store.ledger().last_good(&game()).await.is_none());
        assert!(store.ledger().all().await.is_empty());
        assert!(store.profiles().identifiers().await.is_empty());

        // The fresh live tree and the seeding marker are all that is left.
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["live".to_string(), "seeded.json".to_string()]);

        // Wiped state survives a reopen, and versions start over.
        let store = Store::open(dir.path(), SchemaRegistry::builtin()).await.unwrap();
        assert!(store.ledger().all().await.is_empty());
        assert_eq!(apply(&store, 30).await, 1);
    }

    #[tokio::test]
    async fn test_wiped_store_is_not_reseeded_on_open() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.store.data_dir = Some(dir.path().to_path_buf());
        let cyberpunk = ProfileId::app("Cyberpunk 2077").unwrap();

        let store = Store::open_with_settings(&settings).await.unwrap();
        assert!(store.defaults_seeded().await.unwrap());
        assert_eq!(store.current_effective(&cyberpunk).await.unwrap().version, 1);
        store.wipe_all().await.unwrap();
        drop(store);

        let store = Store::open_with_settings(&settings).await.unwrap();
        assert!(matches!(
            store.current_effective(&cyberpunk).await,
            Err(MxdError::NotFound(_))
        ));
        assert!(store.ledger().last_good(&cyberpunk).await.is_none());
        assert!(store.ledger().all().await.is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_notes_persist_until_wipe() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), SchemaRegistry::builtin()).await.unwrap();
        assert!(store.unresolved().await.unwrap().is_empty());

        store.note_unresolved(&game(), 1).await.unwrap();
        store.note_unresolved(&game(), 1).await.unwrap();
        drop(store);

        let store = Store::open(dir.path(), SchemaRegistry::builtin()).await.unwrap();
        let unresolved = store.unresolved().await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved.get(&game()), Some(&1));

        store.wipe_all().await.unwrap();
        assert!(store.unresolved().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_export_writes_effective_profiles() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path(), SchemaRegistry::builtin()).await.unwrap();
        apply(&store, 60).await;
        apply(&store, 75).await;

        let path = dir.path().join("out").join("profiles.json");
        assert_eq!(store.export_to(&path).await.unwrap(), 1);

        let bundle = ExportBundle::load(&path).await.unwrap();
        assert_eq!(bundle.profiles[0].identifier, game());
        assert_eq!(bundle.profiles[0].version, 2);
        assert_eq!(
            bundle.profiles[0].settings["fps_cap"],
            SettingValue::Integer(75)
        );
    }

    #[tokio::test]
    async fn test_open_rejects_corrupt_shard() {
        let dir = TempDir::new().unwrap();
        {
            let store = Store::open(dir.path(), SchemaRegistry::builtin()).await.unwrap();
            apply(&store, 60).await;
        }
        let path = StoreLayout::new(dir.path()).shard_path(&game());
        std::fs::write(&path, b"{ broken").unwrap();

        let err = Store::open(dir.path(), SchemaRegistry::builtin())
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
    }
}
