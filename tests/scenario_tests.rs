// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::path::Path;
use std::time::Duration;

use mxd::config::Settings;
use mxd::error::MxdError;
use mxd::monitor::{
    EvaluationState, Notification, Resolution, RollbackController, RollbackReason, Verdict,
};
use mxd::profile::{ProfileId, ProfileStatus, SettingValue, SettingsMap};
use mxd::store::Outcome;
use tempfile::TempDir;
use tokio::sync::broadcast;

fn game1() -> ProfileId {
    ProfileId::app("game1").unwrap()
}

fn fps(cap: i64) -> SettingsMap {
    let mut settings = SettingsMap::new();
    settings.insert("fps_cap".to_string(), SettingValue::Integer(cap));
    settings
}

fn settings(dir: &Path, window_secs: u64, seed_defaults: bool) -> Settings {
    let mut settings = Settings::default();
    settings.store.data_dir = Some(dir.to_path_buf());
    settings.store.seed_defaults = seed_defaults;
    settings.monitor.evaluation_window_secs = window_secs;
    settings.monitor.check_interval_secs = 1;
    settings.monitor.settle_secs = 0;
    settings
}

async fn open(dir: &TempDir, window_secs: u64, seed_defaults: bool) -> RollbackController {
    let (controller, resumed) =
        RollbackController::open(&settings(dir.path(), window_secs, seed_defaults))
            .await
            .unwrap();
    assert!(resumed.is_empty());
    controller
}

async fn next_notification(rx: &mut broadcast::Receiver<Notification>) -> Notification {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("notification within timeout")
        .unwrap()
}

// ==================== Scenario A: window timeout ====================

#[tokio::test]
async fn test_timeout_restores_seeded_default() {
    let dir = TempDir::new().unwrap();
    let ctl = open(&dir, 1, true).await;
    let cyberpunk = ProfileId::app("Cyberpunk 2077").unwrap();
    let default_settings = ctl.current_effective(&cyberpunk).await.unwrap().settings;

    let mut rx = ctl.subscribe();
    let receipt = ctl.apply(&cyberpunk, fps(60)).await.unwrap();
    assert_eq!(receipt.version, 2);
    assert_eq!(receipt.prior_version, Some(1));

    assert_eq!(
        next_notification(&mut rx).await,
        Notification::RolledBack {
            identifier: cyberpunk.clone(),
            from_version: 2,
            to_version: Some(3),
            reason: RollbackReason::Timeout,
        }
    );
    let effective = ctl.current_effective(&cyberpunk).await.unwrap();
    assert_eq!(effective.version, 3);
    assert_eq!(effective.settings, default_settings);
}

#[tokio::test]
async fn test_timeout_without_history_reports_no_rollback_target() {
    let dir = TempDir::new().unwrap();
    let ctl = open(&dir, 1, false).await;

    let mut rx = ctl.subscribe();
    ctl.apply(&game1(), fps(60)).await.unwrap();

    assert_eq!(
        next_notification(&mut rx).await,
        Notification::NoRollbackTarget {
            identifier: game1(),
            version: 1,
            reason: RollbackReason::Timeout,
        }
    );
    // Nothing safer exists: the degraded version stays in effect.
    let effective = ctl.current_effective(&game1()).await.unwrap();
    assert_eq!(effective.version, 1);
    assert_eq!(effective.settings, fps(60));
    assert_eq!(ctl.state(&game1()), EvaluationState::Idle);
}

// ==================== Scenario B: degradation report ====================

#[tokio::test]
async fn test_degradation_restores_last_confirmed_as_new_version() {
    let dir = TempDir::new().unwrap();
    let ctl = open(&dir, 120, false).await;

    ctl.apply(&game1(), fps(60)).await.unwrap();
    ctl.confirm(&game1()).await.unwrap();
    ctl.apply(&game1(), fps(144)).await.unwrap();

    let resolution = ctl.report(&game1(), Verdict::Degraded).await.unwrap();
    assert_eq!(
        resolution,
        Resolution::RolledBack {
            identifier: game1(),
            from_version: 2,
            to_version: 3,
            reason: RollbackReason::Degraded,
        }
    );

    let effective = ctl.current_effective(&game1()).await.unwrap();
    assert_eq!(effective.version, 3);
    assert_eq!(effective.settings, fps(60));

    let outcomes: Vec<(u64, Outcome)> = ctl
        .store()
        .ledger()
        .entries(&game1())
        .await
        .iter()
        .map(|e| (e.version, e.outcome))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (1, Outcome::Applied),
            (1, Outcome::ConfirmedGood),
            (2, Outcome::Applied),
            (2, Outcome::Reverted),
            (3, Outcome::Applied),
        ]
    );

    let versions = ctl.store().profiles().list_versions(&game1()).await.unwrap();
    let statuses: Vec<ProfileStatus> = versions.iter().map(|v| v.status).collect();
    assert_eq!(
        statuses,
        vec![
            ProfileStatus::Committed,
            ProfileStatus::Reverted,
            ProfileStatus::Committed,
        ]
    );
}

// ==================== Scenario C: back-to-back applies ====================

#[tokio::test]
async fn test_back_to_back_applies_leave_one_evaluation() {
    let dir = TempDir::new().unwrap();
    let ctl = open(&dir, 120, false).await;

    ctl.apply(&game1(), fps(60)).await.unwrap();
    let second = ctl.apply(&game1(), fps(90)).await.unwrap();
    assert_eq!(second.superseded, Some(1));

    let entries = ctl.store().ledger().entries(&game1()).await;
    assert!(entries
        .iter()
        .any(|e| e.version == 1 && e.outcome == Outcome::Reverted));
    let applied_tail = ctl.store().ledger().tail(&game1()).await.unwrap();
    assert_eq!(applied_tail.version, 2);
    assert_eq!(applied_tail.outcome, Outcome::Applied);

    assert_eq!(ctl.evaluating(), vec![game1()]);
    assert!(matches!(
        ctl.state(&game1()),
        EvaluationState::Evaluating { version: 2, .. }
    ));
}

#[tokio::test]
async fn test_concurrent_applies_serialize_per_identifier() {
    let dir = TempDir::new().unwrap();
    let ctl = open(&dir, 120, false).await;

    let a = {
        let ctl = ctl.clone();
        tokio::spawn(async move { ctl.apply(&game1(), fps(60)).await })
    };
    let b = {
        let ctl = ctl.clone();
        tokio::spawn(async move { ctl.apply(&game1(), fps(90)).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let entries = ctl.store().ledger().entries(&game1()).await;
    let reverted = entries
        .iter()
        .filter(|e| e.outcome == Outcome::Reverted)
        .count();
    assert_eq!(reverted, 1);
    assert_eq!(ctl.evaluating().len(), 1);
}

// ==================== Scenario D: wipe ====================

#[tokio::test]
async fn test_wipe_all_then_read_finds_nothing() {
    let dir = TempDir::new().unwrap();
    let ctl = open(&dir, 120, true).await;
    ctl.apply(&game1(), fps(60)).await.unwrap();
    ctl.confirm(&game1()).await.unwrap();

    let known = ctl.store().profiles().identifiers().await;
    assert!(known.len() >= 3);

    ctl.wipe_all().await.unwrap();

    for identifier in &known {
        assert!(matches!(
            ctl.store().profiles().get(identifier, None).await,
            Err(MxdError::NotFound(_))
        ));
        assert!(ctl.store().ledger().last_good(identifier).await.is_none());
        assert!(ctl.store().ledger().tail(identifier).await.is_none());
    }
    assert!(ctl.evaluating().is_empty());
}

#[tokio::test]
async fn test_wipe_is_not_undone_by_reopening_with_seeding() {
    let dir = TempDir::new().unwrap();
    let cyberpunk = ProfileId::app("Cyberpunk 2077").unwrap();
    {
        let ctl = open(&dir, 120, true).await;
        assert!(ctl.current_effective(&cyberpunk).await.is_ok());
        ctl.wipe_all().await.unwrap();
    }

    let ctl = open(&dir, 120, true).await;
    assert!(matches!(
        ctl.current_effective(&cyberpunk).await,
        Err(MxdError::NotFound(_))
    ));
    assert!(ctl.store().ledger().last_good(&cyberpunk).await.is_none());
    assert!(ctl.store().profiles().identifiers().await.is_empty());
}

// ==================== Properties ====================

#[tokio::test]
async fn test_effective_follows_every_committed_apply() {
    let dir = TempDir::new().unwrap();
    let ctl = open(&dir, 120, false).await;

    for (i, cap) in [30, 60, 90, 120, 144].into_iter().enumerate() {
        let receipt = ctl.apply(&game1(), fps(cap)).await.unwrap();
        let effective = ctl.current_effective(&game1()).await.unwrap();
        assert_eq!(effective.version, receipt.version);
        assert_eq!(effective.settings, fps(cap));
        if i % 2 == 1 {
            ctl.confirm(&game1()).await.unwrap();
        }
    }
}

#[tokio::test]
async fn test_confirm_twice_adds_no_entries() {
    let dir = TempDir::new().unwrap();
    let ctl = open(&dir, 120, false).await;
    ctl.apply(&game1(), fps(60)).await.unwrap();

    ctl.confirm(&game1()).await.unwrap();
    let before = ctl.store().ledger().entries(&game1()).await.len();

    assert_eq!(
        ctl.confirm(&game1()).await.unwrap(),
        Resolution::AlreadyConfirmed {
            identifier: game1(),
            version: 1,
        }
    );
    assert_eq!(ctl.store().ledger().entries(&game1()).await.len(), before);
}

#[tokio::test]
async fn test_schema_violation_leaves_no_trace() {
    let dir = TempDir::new().unwrap();
    let ctl = open(&dir, 120, false).await;

    let mut bad = SettingsMap::new();
    bad.insert("fps_cap".to_string(), SettingValue::Float(60.0));
    assert!(matches!(
        ctl.apply(&game1(), bad).await,
        Err(MxdError::SchemaViolation { .. })
    ));

    assert!(ctl.store().ledger().all().await.is_empty());
    assert!(matches!(
        ctl.current_effective(&game1()).await,
        Err(MxdError::NotFound(_))
    ));

    // The rejected put did not consume a version.
    assert_eq!(ctl.apply(&game1(), fps(60)).await.unwrap().version, 1);
}

#[tokio::test]
async fn test_identifiers_are_independent() {
    let dir = TempDir::new().unwrap();
    let ctl = open(&dir, 120, false).await;
    let game2 = ProfileId::app("game2").unwrap();

    ctl.apply(&game1(), fps(60)).await.unwrap();
    ctl.apply(&game2, fps(30)).await.unwrap();
    ctl.confirm(&game1()).await.unwrap();

    assert_eq!(ctl.state(&game1()), EvaluationState::Idle);
    assert!(matches!(
        ctl.state(&game2),
        EvaluationState::Evaluating { version: 1, .. }
    ));
}
