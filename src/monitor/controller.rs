// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Rollback controller
//!
//! Per identifier: Idle -> Evaluating -> (Confirmed | Reverting |
//! NoRollbackTarget) -> Idle. The controller owns no persistent state; the
//! evaluation map only tracks open windows and their timers. Every
//! transition is committed through the transaction writer while holding
//! the identifier's lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;

use super::{Notification, RollbackReason, Verdict};
use crate::config::{MonitorConfig, Settings};
use crate::error::{MxdError, Result};
use crate::profile::{Profile, ProfileId, SettingsMap};
use crate::store::{EntryDraft, ExportBundle, IdentifierGuard, Outcome, Store, Transaction};

const NOTIFICATION_CAPACITY: usize = 64;

/// Delay before retrying a timed-out revert that failed on IO.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// An open evaluation window
struct Evaluation {
    /// Distinguishes this window from later ones for the same identifier
    token: u64,
    version: u64,
    prior_version: Option<u64>,
    deadline: DateTime<Utc>,
    timer: Option<JoinHandle<()>>,
}

impl Evaluation {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// An applied version awaiting a verdict
#[derive(Debug, Clone, Copy)]
struct Pending {
    version: u64,
    prior_version: Option<u64>,
}

/// Evaluation state of one identifier
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EvaluationState {
    Idle,
    Evaluating {
        version: u64,
        prior_version: Option<u64>,
        deadline: DateTime<Utc>,
    },
}

/// Result of a successful apply
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyReceipt {
    pub identifier: ProfileId,
    pub version: u64,
    pub prior_version: Option<u64>,
    /// Ledger sequence of the `applied` entry
    pub sequence: u64,
    /// End of the evaluation window
    pub deadline: DateTime<Utc>,
    /// Provisional version that this apply reverted first
    pub superseded: Option<u64>,
}

/// How an evaluation ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Resolution {
    Confirmed {
        identifier: ProfileId,
        version: u64,
    },
    /// Nothing was pending and the latest entry is already confirmed-good
    AlreadyConfirmed {
        identifier: ProfileId,
        version: u64,
    },
    /// `to_version` is a new version carrying the last-good payload
    RolledBack {
        identifier: ProfileId,
        from_version: u64,
        to_version: u64,
        reason: RollbackReason,
    },
}

/// What [`RollbackController::resume`] did for one identifier
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ResumeOutcome {
    /// Window still open; timer armed for the remaining time
    Rearmed {
        identifier: ProfileId,
        version: u64,
        deadline: DateTime<Utc>,
    },
    /// Window had expired; the version was rolled back
    TimedOut {
        identifier: ProfileId,
        from_version: u64,
        to_version: u64,
    },
    /// Window had expired but nothing confirmed-good exists
    Unresolved { identifier: ProfileId, version: u64 },
}

struct Inner {
    store: Store,
    config: MonitorConfig,
    evaluations: Mutex<HashMap<ProfileId, Evaluation>>,
    notifier: broadcast::Sender<Notification>,
    /// Shared by every operation, exclusive for `wipe_all`
    gate: RwLock<()>,
    tokens: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let evaluations = self
            .evaluations
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for evaluation in evaluations.values_mut() {
            evaluation.cancel_timer();
        }
    }
}

/// Orchestrates apply / confirm / revert for every identifier
#[derive(Clone)]
pub struct RollbackController {
    inner: Arc<Inner>,
}

impl RollbackController {
    pub fn new(store: Store, config: MonitorConfig) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                evaluations: Mutex::new(HashMap::new()),
                notifier,
                gate: RwLock::new(()),
                tokens: AtomicU64::new(1),
            }),
        }
    }

    /// Open the configured store and, when enabled, pick up evaluation
    /// windows left open by a previous process.
    pub async fn open(settings: &Settings) -> Result<(Self, Vec<ResumeOutcome>)> {
        settings.validate()?;
        let store = Store::open_with_settings(settings).await?;
        let controller = Self::new(store, settings.monitor.clone());
        let resumed = if settings.monitor.resume_on_open {
            controller.resume().await?
        } else {
            Vec::new()
        };
        Ok((controller, resumed))
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Receive rollback notifications from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifier.subscribe()
    }

    pub fn state(&self, identifier: &ProfileId) -> EvaluationState {
        match self.evaluations().get(identifier) {
            Some(ev) => EvaluationState::Evaluating {
                version: ev.version,
                prior_version: ev.prior_version,
                deadline: ev.deadline,
            },
            None => EvaluationState::Idle,
        }
    }

    /// Identifiers with an open evaluation window, sorted.
    pub fn evaluating(&self) -> Vec<ProfileId> {
        let mut ids: Vec<ProfileId> = self.evaluations().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn current_effective(&self, identifier: &ProfileId) -> Result<Profile> {
        self.inner.store.current_effective(identifier).await
    }

    /// Validate, commit and start evaluating a new version.
    ///
    /// A version of the same identifier that is still being evaluated is
    /// reverted first, so two provisional versions never stack.
    pub async fn apply(&self, identifier: &ProfileId, settings: SettingsMap) -> Result<ApplyReceipt> {
        let (_gate, guard) = self.enter(identifier).await;
        let store = &self.inner.store;

        let staged = store.profiles().put(identifier, settings).await?;

        let superseded = match self.pending(identifier) {
            Some(pending) => {
                self.supersede(&guard, pending).await?;
                Some(pending.version)
            }
            None => None,
        };

        let prior_version = store.profiles().effective_version(identifier).await;
        let version = staged.version;
        let tx = Transaction::new(identifier.clone())
            .with_profile(staged)
            .entry(EntryDraft::new(version, prior_version, Outcome::Applied));
        let receipt = store.writer().commit(&guard, tx).await?;

        let started = receipt.last_entry().map(|e| e.timestamp).unwrap_or_else(Utc::now);
        let deadline = deadline_after(started, self.inner.config.evaluation_window());
        self.arm(identifier, version, prior_version, deadline);

        tracing::info!(
            identifier = %identifier,
            version,
            prior_version = ?prior_version,
            "Applied profile, evaluating until {}",
            deadline
        );

        Ok(ApplyReceipt {
            identifier: identifier.clone(),
            version,
            prior_version,
            sequence: receipt.first_sequence,
            deadline,
            superseded,
        })
    }

    /// Mark the version under evaluation as confirmed-good.
    ///
    /// Confirming again once confirmed is a no-op.
    pub async fn confirm(&self, identifier: &ProfileId) -> Result<Resolution> {
        let (_gate, guard) = self.enter(identifier).await;
        let pending = self.pending_or_adopt(identifier).await;
        self.confirm_locked(&guard, pending).await
    }

    /// Abandon the evaluation; treated exactly like a degradation report.
    pub async fn cancel(&self, identifier: &ProfileId) -> Result<Resolution> {
        let (_gate, guard) = self.enter(identifier).await;
        let pending = self.pending_or_adopt(identifier).await;
        self.revert_locked(&guard, pending, RollbackReason::Cancelled)
            .await
    }

    /// Feed a verdict for the version under evaluation.
    pub async fn report(&self, identifier: &ProfileId, verdict: Verdict) -> Result<Resolution> {
        let (_gate, guard) = self.enter(identifier).await;
        let pending = self.pending_or_adopt(identifier).await;
        if verdict.is_acceptable(self.inner.config.acceptance_threshold) {
            self.confirm_locked(&guard, pending).await
        } else {
            self.revert_locked(&guard, pending, RollbackReason::Degraded)
                .await
        }
    }

    /// Like [`report`](Self::report), but only if `version` is still the
    /// one under evaluation. Returns `None` when the evaluation has moved
    /// on.
    pub(crate) async fn report_for(
        &self,
        identifier: &ProfileId,
        version: u64,
        verdict: Verdict,
    ) -> Result<Option<Resolution>> {
        let (_gate, guard) = self.enter(identifier).await;
        let pending = match self.pending(identifier) {
            Some(p) if p.version == version => p,
            _ => return Ok(None),
        };
        let resolution = if verdict.is_acceptable(self.inner.config.acceptance_threshold) {
            self.confirm_locked(&guard, Some(pending)).await?
        } else {
            self.revert(&guard, pending, RollbackReason::Degraded).await?
        };
        Ok(Some(resolution))
    }

    /// Resolve or re-arm evaluation windows recorded in the ledger.
    ///
    /// A version whose latest entry is `applied` was still provisional when
    /// the previous process stopped. Its window started at the entry's
    /// timestamp. An expired version already reported as having no
    /// rollback target is left alone.
    pub async fn resume(&self) -> Result<Vec<ResumeOutcome>> {
        let mut outcomes = Vec::new();
        let store = &self.inner.store;
        let unresolved = store.unresolved().await?;

        for identifier in store.profiles().identifiers().await {
            let (_gate, guard) = self.enter(&identifier).await;
            if self.pending(&identifier).is_some() {
                continue;
            }
            let Some(tail) = store.ledger().tail(&identifier).await else {
                continue;
            };
            if tail.outcome != Outcome::Applied {
                continue;
            }

            let deadline = deadline_after(tail.timestamp, self.inner.config.evaluation_window());
            if deadline > Utc::now() {
                self.arm(&identifier, tail.version, tail.prior_version, deadline);
                outcomes.push(ResumeOutcome::Rearmed {
                    identifier: identifier.clone(),
                    version: tail.version,
                    deadline,
                });
                continue;
            }
            if unresolved.get(&identifier) == Some(&tail.version) {
                continue;
            }

            let pending = Pending {
                version: tail.version,
                prior_version: tail.prior_version,
            };
            match self.revert(&guard, pending, RollbackReason::Timeout).await {
                Ok(Resolution::RolledBack { to_version, .. }) => {
                    outcomes.push(ResumeOutcome::TimedOut {
                        identifier: identifier.clone(),
                        from_version: tail.version,
                        to_version,
                    })
                }
                Ok(_) => {}
                Err(MxdError::NoRollbackTarget { .. }) => outcomes.push(ResumeOutcome::Unresolved {
                    identifier: identifier.clone(),
                    version: tail.version,
                }),
                Err(e) => return Err(e),
            }
        }

        Ok(outcomes)
    }

    /// Clear the store and ledger, dropping every open evaluation.
    pub async fn wipe_all(&self) -> Result<()> {
        let _gate = self.inner.gate.write().await;
        for (_, mut evaluation) in self.evaluations().drain() {
            evaluation.cancel_timer();
        }
        self.inner.store.wipe_all().await
    }

    /// Apply every profile of an exported bundle.
    ///
    /// The whole bundle is validated before the first apply.
    pub async fn import(&self, path: &Path) -> Result<Vec<ApplyReceipt>> {
        let bundle = ExportBundle::load(path).await?;
        bundle.validate(self.inner.store.schema())?;

        let mut receipts = Vec::with_capacity(bundle.profiles.len());
        for profile in bundle.profiles {
            receipts.push(self.apply(&profile.identifier, profile.settings).await?);
        }
        tracing::info!("Imported {} profiles from {:?}", receipts.len(), path);
        Ok(receipts)
    }

    async fn enter(&self, identifier: &ProfileId) -> (RwLockReadGuard<'_, ()>, IdentifierGuard) {
        let gate = self.inner.gate.read().await;
        let guard = self.inner.store.lock(identifier).await;
        (gate, guard)
    }

    fn evaluations(&self) -> MutexGuard<'_, HashMap<ProfileId, Evaluation>> {
        self.inner
            .evaluations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self, identifier: &ProfileId) -> Option<Pending> {
        self.evaluations().get(identifier).map(|ev| Pending {
            version: ev.version,
            prior_version: ev.prior_version,
        })
    }

    /// The open evaluation, or an `applied` ledger tail without one (its
    /// window was never armed in this process, or it ended without a
    /// rollback target).
    async fn pending_or_adopt(&self, identifier: &ProfileId) -> Option<Pending> {
        if let Some(pending) = self.pending(identifier) {
            return Some(pending);
        }
        self.inner
            .store
            .ledger()
            .tail(identifier)
            .await
            .filter(|tail| tail.outcome == Outcome::Applied)
            .map(|tail| Pending {
                version: tail.version,
                prior_version: tail.prior_version,
            })
    }

    /// Close the evaluation of `identifier`, stopping its timer.
    fn finish(&self, identifier: &ProfileId) {
        if let Some(mut evaluation) = self.evaluations().remove(identifier) {
            evaluation.cancel_timer();
        }
    }

    fn arm(
        &self,
        identifier: &ProfileId,
        version: u64,
        prior_version: Option<u64>,
        deadline: DateTime<Utc>,
    ) {
        let token = self.inner.tokens.fetch_add(1, Ordering::Relaxed);
        let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let id = identifier.clone();

        let timer = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(inner) = weak.upgrade() {
                RollbackController { inner }.expire(&id, token).await;
            }
        });

        let evaluation = Evaluation {
            token,
            version,
            prior_version,
            deadline,
            timer: Some(timer),
        };
        if let Some(mut replaced) = self.evaluations().insert(identifier.clone(), evaluation) {
            replaced.cancel_timer();
        }
        tracing::debug!(identifier = %identifier, version, token, "Armed evaluation timer");
    }

    /// Window timer body.
    async fn expire(&self, identifier: &ProfileId, token: u64) {
        let (_gate, guard) = self.enter(identifier).await;

        let evaluation = {
            let mut evaluations = self.evaluations();
            match evaluations.get(identifier) {
                Some(ev) if ev.token == token => evaluations.remove(identifier),
                _ => None,
            }
        };
        // Running inside this evaluation's own timer: drop the handle, never
        // abort it.
        let Some(mut evaluation) = evaluation else {
            return;
        };
        drop(evaluation.timer.take());

        tracing::info!(
            identifier = %identifier,
            version = evaluation.version,
            "Evaluation window expired"
        );

        let pending = Pending {
            version: evaluation.version,
            prior_version: evaluation.prior_version,
        };
        match self.revert(&guard, pending, RollbackReason::Timeout).await {
            Ok(_) | Err(MxdError::NoRollbackTarget { .. }) => {}
            Err(e) => {
                tracing::error!(
                    identifier = %identifier,
                    version = evaluation.version,
                    "Rollback after timeout failed, retrying: {}",
                    e
                );
                let retry = deadline_after(Utc::now(), RETRY_DELAY);
                self.arm(identifier, evaluation.version, evaluation.prior_version, retry);
            }
        }
    }

    async fn supersede(&self, guard: &IdentifierGuard, pending: Pending) -> Result<()> {
        let identifier = guard.identifier();
        let tx = Transaction::new(identifier.clone()).entry(EntryDraft::new(
            pending.version,
            pending.prior_version,
            Outcome::Reverted,
        ));
        self.inner.store.writer().commit(guard, tx).await?;
        self.finish(identifier);

        tracing::info!(
            identifier = %identifier,
            version = pending.version,
            "Superseded provisional version"
        );
        self.notify(Notification::RolledBack {
            identifier: identifier.clone(),
            from_version: pending.version,
            to_version: pending.prior_version,
            reason: RollbackReason::Superseded,
        });
        Ok(())
    }

    async fn confirm_locked(
        &self,
        guard: &IdentifierGuard,
        pending: Option<Pending>,
    ) -> Result<Resolution> {
        let identifier = guard.identifier();
        let store = &self.inner.store;

        let Some(pending) = pending else {
            return match store.ledger().tail(identifier).await {
                Some(tail) if tail.outcome == Outcome::ConfirmedGood => {
                    Ok(Resolution::AlreadyConfirmed {
                        identifier: identifier.clone(),
                        version: tail.version,
                    })
                }
                Some(_) => Err(MxdError::InvalidInput(format!(
                    "'{}' has no applied version awaiting confirmation",
                    identifier
                ))),
                None => Err(MxdError::not_found(identifier)),
            };
        };

        store
            .ledger()
            .append(
                guard,
                EntryDraft::new(
                    pending.version,
                    pending.prior_version,
                    Outcome::ConfirmedGood,
                ),
            )
            .await?;
        self.finish(identifier);

        tracing::info!(identifier = %identifier, version = pending.version, "Confirmed profile");
        Ok(Resolution::Confirmed {
            identifier: identifier.clone(),
            version: pending.version,
        })
    }

    async fn revert_locked(
        &self,
        guard: &IdentifierGuard,
        pending: Option<Pending>,
        reason: RollbackReason,
    ) -> Result<Resolution> {
        match pending {
            Some(pending) => self.revert(guard, pending, reason).await,
            None if self.inner.store.ledger().tail(guard.identifier()).await.is_none() => {
                Err(MxdError::not_found(guard.identifier()))
            }
            None => Err(MxdError::InvalidInput(format!(
                "'{}' has no evaluation in progress",
                guard.identifier()
            ))),
        }
    }

    /// Undo `pending` by restoring the last-good payload as a new version.
    ///
    /// One transaction records the `reverted` entry and the `applied`
    /// entry of the restored version, which starts its own window.
    async fn revert(
        &self,
        guard: &IdentifierGuard,
        pending: Pending,
        reason: RollbackReason,
    ) -> Result<Resolution> {
        let identifier = guard.identifier();
        let store = &self.inner.store;

        let Some(settings) = self.rollback_target(identifier, pending.version).await? else {
            self.finish(identifier);
            tracing::warn!(
                identifier = %identifier,
                version = pending.version,
                %reason,
                "No confirmed-good version to roll back to"
            );
            if let Err(e) = store.note_unresolved(identifier, pending.version).await {
                tracing::warn!(
                    "Could not record unresolved v{} of {}: {}",
                    pending.version,
                    identifier,
                    e
                );
            }
            self.notify(Notification::NoRollbackTarget {
                identifier: identifier.clone(),
                version: pending.version,
                reason,
            });
            return Err(MxdError::NoRollbackTarget {
                identifier: identifier.to_string(),
                version: pending.version,
            });
        };

        let restored = store.profiles().restage(identifier, settings).await;
        let to_version = restored.version;
        let tx = Transaction::new(identifier.clone())
            .with_profile(restored)
            .entry(EntryDraft::new(
                pending.version,
                pending.prior_version,
                Outcome::Reverted,
            ))
            .entry(EntryDraft::new(
                to_version,
                pending.prior_version,
                Outcome::Applied,
            ));
        let receipt = store.writer().commit(guard, tx).await?;

        self.finish(identifier);
        let started = receipt.last_entry().map(|e| e.timestamp).unwrap_or_else(Utc::now);
        let deadline = deadline_after(started, self.inner.config.evaluation_window());
        self.arm(identifier, to_version, pending.prior_version, deadline);

        tracing::info!(
            identifier = %identifier,
            from_version = pending.version,
            to_version,
            %reason,
            "Rolled back to last known good"
        );
        self.notify(Notification::RolledBack {
            identifier: identifier.clone(),
            from_version: pending.version,
            to_version: Some(to_version),
            reason,
        });

        Ok(Resolution::RolledBack {
            identifier: identifier.clone(),
            from_version: pending.version,
            to_version,
            reason,
        })
    }

    /// Settings to restore instead of `degraded`, if there is anything
    /// safer. A degraded version that already carries the last-good payload
    /// has nothing to fall back to.
    async fn rollback_target(
        &self,
        identifier: &ProfileId,
        degraded: u64,
    ) -> Result<Option<SettingsMap>> {
        let store = &self.inner.store;
        let Some(good) = store.ledger().last_good(identifier).await else {
            return Ok(None);
        };
        let good = store.profiles().get(identifier, Some(good.version)).await?;
        let current = store.profiles().get(identifier, Some(degraded)).await?;
        if good.settings == current.settings {
            return Ok(None);
        }
        Ok(Some(good.settings))
    }

    fn notify(&self, notification: Notification) {
        if self.inner.notifier.send(notification).is_err() {
            tracing::debug!("No subscribers for rollback notification");
        }
    }
}

fn deadline_after(start: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| start.checked_add_signed(w))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
