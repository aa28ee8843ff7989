// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinSet;

use mxd::cli::{
    ApplyArgs, LedgerArgs, OutputFormat, PathArgs, ReportArgs, SchemaArgs, SchemaScope,
    SettingsArgs, SettingsCommands, ShowArgs, StatusArgs, TargetArgs, WatchArgs, WipeArgs,
};
use mxd::config::Settings;
use mxd::error::{MxdError, Result};
use mxd::monitor::{
    EvaluationState, FileSignal, Notification, Resolution, ResumeOutcome, RollbackController,
    StabilityMonitor, Verdict, WatchOutcome,
};
use mxd::profile::{Category, ProfileId, SettingSpec, SettingsMap};

/// Print `value` as JSON, or the text rendering.
fn emit<T: Serialize>(format: &OutputFormat, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => println!("{}", text()),
    }
    Ok(())
}

fn parse_id(raw: &str) -> Result<ProfileId> {
    raw.parse()
}

fn version_label(version: Option<u64>) -> String {
    version.map_or_else(|| "none".to_string(), |v| format!("v{}", v))
}

fn describe(resolution: &Resolution) -> String {
    match resolution {
        Resolution::Confirmed {
            identifier,
            version,
        } => format!("{}: v{} confirmed as last known good", identifier, version),
        Resolution::AlreadyConfirmed {
            identifier,
            version,
        } => format!("{}: v{} is already confirmed", identifier, version),
        Resolution::RolledBack {
            identifier,
            from_version,
            to_version,
            reason,
        } => format!(
            "{}: rolled back v{} ({}), last known good restored as v{}",
            identifier, from_version, reason, to_version
        ),
    }
}

/// Print a resolution. A revert that found no confirmed-good version
/// leaves the current one in effect, which is a warning and not a failure.
fn emit_resolution(outcome: Result<Resolution>, format: &OutputFormat) -> Result<()> {
    match outcome {
        Ok(resolution) => emit(format, &resolution, || describe(&resolution)),
        Err(MxdError::NoRollbackTarget {
            identifier,
            version,
        }) => {
            tracing::warn!(identifier = %identifier, version, "Nothing to roll back to");
            let value = serde_json::json!({
                "result": "no_rollback_target",
                "identifier": identifier,
                "version": version,
            });
            emit(format, &value, || {
                format!(
                    "warning: {}: v{} stays in effect, there is no confirmed-good version to restore",
                    identifier, version
                )
            })
        }
        Err(e) => Err(e),
    }
}

/// Report what opening the store did with windows left by a previous run.
pub(super) fn report_resumed(outcomes: &[ResumeOutcome], format: &OutputFormat) -> Result<()> {
    for outcome in outcomes {
        let text = || match outcome {
            ResumeOutcome::Rearmed {
                identifier,
                version,
                deadline,
            } => format!(
                "{}: v{} still under evaluation until {}",
                identifier,
                version,
                deadline.format("%Y-%m-%d %H:%M:%S")
            ),
            ResumeOutcome::TimedOut {
                identifier,
                from_version,
                to_version,
            } => format!(
                "{}: v{} was never confirmed, restored last known good as v{}",
                identifier, from_version, to_version
            ),
            ResumeOutcome::Unresolved {
                identifier,
                version,
            } => format!(
                "{}: v{} was never confirmed and there is nothing to restore",
                identifier, version
            ),
        };
        match format {
            // Keep stdout a single JSON document for the command itself.
            OutputFormat::Json => eprintln!("{}", serde_json::to_string(outcome)?),
            OutputFormat::Text => eprintln!("{}", text()),
        }
    }
    Ok(())
}

pub(super) async fn run_apply(
    controller: &RollbackController,
    args: ApplyArgs,
    format: &OutputFormat,
) -> Result<()> {
    let identifier = parse_id(&args.identifier)?;
    let schema = controller.store().schema();

    let mut settings = SettingsMap::new();
    for assignment in &args.settings {
        let (key, value) = schema.parse_assignment(&identifier, assignment)?;
        if settings.insert(key.clone(), value).is_some() {
            return Err(MxdError::InvalidInput(format!(
                "setting '{}' given more than once",
                key
            )));
        }
    }

    let receipt = controller.apply(&identifier, settings).await?;
    emit(format, &receipt, || {
        let mut text = String::new();
        if let Some(superseded) = receipt.superseded {
            text.push_str(&format!(
                "{}: v{} was still under evaluation and has been rolled back\n",
                receipt.identifier, superseded
            ));
        }
        text.push_str(&format!(
            "{}: applied v{} (previously {}), evaluating until {}\n",
            receipt.identifier,
            receipt.version,
            version_label(receipt.prior_version),
            receipt.deadline.format("%Y-%m-%d %H:%M:%S")
        ));
        text.push_str(&format!(
            "Run `mxd confirm {}` to keep it, or `mxd cancel {}` to undo it.",
            receipt.identifier, receipt.identifier
        ));
        text
    })
}

pub(super) async fn run_confirm(
    controller: &RollbackController,
    args: TargetArgs,
    format: &OutputFormat,
) -> Result<()> {
    let identifier = parse_id(&args.identifier)?;
    let resolution = controller.confirm(&identifier).await?;
    emit(format, &resolution, || describe(&resolution))
}

pub(super) async fn run_cancel(
    controller: &RollbackController,
    args: TargetArgs,
    format: &OutputFormat,
) -> Result<()> {
    let identifier = parse_id(&args.identifier)?;
    emit_resolution(controller.cancel(&identifier).await, format)
}

pub(super) async fn run_report(
    controller: &RollbackController,
    args: ReportArgs,
    format: &OutputFormat,
) -> Result<()> {
    let identifier = parse_id(&args.identifier)?;
    let verdict = match (args.ok, args.degraded, args.score) {
        (true, _, _) => Verdict::Acceptable,
        (_, true, _) => Verdict::Degraded,
        (_, _, Some(score)) => Verdict::Score(score),
        _ => {
            return Err(MxdError::InvalidInput(
                "one of --ok, --degraded or --score is required".to_string(),
            ))
        }
    };
    emit_resolution(controller.report(&identifier, verdict).await, format)
}

pub(super) async fn run_show(
    controller: &RollbackController,
    args: ShowArgs,
    format: &OutputFormat,
) -> Result<()> {
    let identifier = parse_id(&args.identifier)?;
    let profile = controller
        .store()
        .profiles()
        .get(&identifier, args.version)
        .await?;

    emit(format, &profile, || {
        let mut text = format!(
            "{} v{} ({}, {})",
            profile.identifier,
            profile.version,
            profile.status.label(),
            profile.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        for (key, value) in &profile.settings {
            text.push_str(&format!("\n  {} = {}", key, value));
        }
        text
    })
}

pub(super) async fn run_versions(
    controller: &RollbackController,
    args: TargetArgs,
    format: &OutputFormat,
) -> Result<()> {
    let identifier = parse_id(&args.identifier)?;
    let versions = controller.store().profiles().list_versions(&identifier).await?;

    emit(format, &versions, || {
        let mut lines = vec![format!("Versions of {}:", identifier)];
        for info in &versions {
            lines.push(format!(
                "  {} v{:<4} {:<10} {} settings  {}",
                if info.effective { "*" } else { " " },
                info.version,
                info.status.label(),
                info.setting_count,
                info.created_at.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        lines.join("\n")
    })
}

pub(super) async fn run_ledger(
    controller: &RollbackController,
    args: LedgerArgs,
    format: &OutputFormat,
) -> Result<()> {
    let ledger = controller.store().ledger();
    let mut entries = match args.identifier.as_deref() {
        Some(raw) => ledger.entries(&parse_id(raw)?).await,
        None => ledger.all().await,
    };
    let skip = entries.len().saturating_sub(args.limit);
    entries.drain(..skip);

    emit(format, &entries, || {
        if entries.is_empty() {
            return "Ledger is empty.".to_string();
        }
        entries
            .iter()
            .map(|e| {
                format!(
                    "#{:<5} {} {:<16} v{:<4} {:<15} from {}",
                    e.sequence,
                    e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    e.identifier.to_string(),
                    e.version,
                    e.outcome.label(),
                    version_label(e.prior_version)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

#[derive(Debug, Serialize)]
struct StatusRow {
    identifier: ProfileId,
    effective_version: Option<u64>,
    last_good_version: Option<u64>,
    evaluation: EvaluationState,
}

pub(super) async fn run_status(
    controller: &RollbackController,
    args: StatusArgs,
    format: &OutputFormat,
) -> Result<()> {
    let store = controller.store();
    let identifiers = match args.identifier.as_deref() {
        Some(raw) => vec![parse_id(raw)?],
        None => store.profiles().identifiers().await,
    };

    let mut rows = Vec::with_capacity(identifiers.len());
    for identifier in identifiers {
        rows.push(StatusRow {
            effective_version: store.profiles().effective_version(&identifier).await,
            last_good_version: store.ledger().last_good(&identifier).await.map(|e| e.version),
            evaluation: controller.state(&identifier),
            identifier,
        });
    }

    emit(format, &rows, || {
        if rows.is_empty() {
            return "No profiles stored.".to_string();
        }
        rows.iter()
            .map(|row| {
                let evaluation = match &row.evaluation {
                    EvaluationState::Idle => String::new(),
                    EvaluationState::Evaluating {
                        version, deadline, ..
                    } => format!(
                        "  [evaluating v{} until {}]",
                        version,
                        deadline.format("%H:%M:%S")
                    ),
                };
                format!(
                    "{:<16} effective {:<6} last good {:<6}{}",
                    row.identifier.to_string(),
                    version_label(row.effective_version),
                    version_label(row.last_good_version),
                    evaluation
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

/// Print one watch result; quiet when the watcher had nothing to do.
fn print_watch_outcome(
    identifier: &ProfileId,
    outcome: &WatchOutcome,
    format: &OutputFormat,
) -> Result<()> {
    match outcome {
        WatchOutcome::Decided(resolution) => emit(format, resolution, || describe(resolution)),
        WatchOutcome::Ended => {
            tracing::debug!(identifier = %identifier, "Evaluation resolved elsewhere");
            Ok(())
        }
        WatchOutcome::NotEvaluating => Ok(()),
    }
}

fn print_notification(notification: &Notification, format: &OutputFormat) -> Result<()> {
    emit(format, notification, || notification.to_string())
}

/// Stay attached until every open evaluation is resolved or Ctrl-C.
pub(super) async fn run_watch(
    controller: &RollbackController,
    args: WatchArgs,
    format: &OutputFormat,
) -> Result<()> {
    let mut events = controller.subscribe();
    let mut watchers: JoinSet<(ProfileId, Result<WatchOutcome>)> = JoinSet::new();

    if let Some(path) = args.signal_file {
        let monitor = Arc::new(StabilityMonitor::new(
            controller.clone(),
            Arc::new(FileSignal::new(path)),
        ));
        for identifier in controller.evaluating() {
            let monitor = Arc::clone(&monitor);
            watchers.spawn(async move {
                let outcome = monitor.follow(&identifier).await;
                (identifier, outcome)
            });
        }
    }

    if controller.evaluating().is_empty() {
        if let OutputFormat::Text = format {
            println!("Nothing is under evaluation.");
        }
        return Ok(());
    }
    if let OutputFormat::Text = format {
        let ids: Vec<String> = controller
            .evaluating()
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("Watching {} (Ctrl-C to detach)", ids.join(", "));
    }

    loop {
        if controller.evaluating().is_empty() && watchers.is_empty() {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                watchers.abort_all();
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(notification) => print_notification(&notification, format)?,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Watcher fell behind, notifications dropped");
                }
                Err(RecvError::Closed) => break,
            },
            Some(joined) = watchers.join_next(), if !watchers.is_empty() => match joined {
                Ok((identifier, Ok(outcome))) => print_watch_outcome(&identifier, &outcome, format)?,
                Ok((identifier, Err(e))) => {
                    tracing::warn!(identifier = %identifier, "Stability monitor stopped: {}", e);
                    eprintln!("{}: {}", identifier, e);
                }
                Err(e) => tracing::warn!("Stability monitor task failed: {}", e),
            },
        }
    }

    // Notifications sent just before the last window closed.
    loop {
        match events.try_recv() {
            Ok(notification) => print_notification(&notification, format)?,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct SchemaRow<'a> {
    scope: Category,
    key: &'a str,
    #[serde(flatten)]
    spec: &'a SettingSpec,
}

pub(super) fn run_schema(
    controller: &RollbackController,
    args: SchemaArgs,
    format: &OutputFormat,
) -> Result<()> {
    let schema = controller.store().schema();
    let scopes: &[Category] = match args.scope {
        Some(SchemaScope::Global) => &[Category::Global],
        Some(SchemaScope::App) => &[Category::App],
        None => &[Category::Global, Category::App],
    };

    let rows: Vec<SchemaRow<'_>> = scopes
        .iter()
        .flat_map(|&scope| {
            schema.settings(scope).map(move |(key, spec)| SchemaRow {
                scope,
                key: key.as_str(),
                spec,
            })
        })
        .collect();

    emit(format, &rows, || {
        rows.iter()
            .map(|row| format!("{:<7} {:<28} {}", row.scope.label(), row.key, row.spec.describe()))
            .collect::<Vec<_>>()
            .join("\n")
    })
}

pub(super) async fn run_export(
    controller: &RollbackController,
    args: PathArgs,
    format: &OutputFormat,
) -> Result<()> {
    let count = controller.store().export_to(&args.path).await?;
    emit(
        format,
        &serde_json::json!({ "exported": count, "path": args.path }),
        || format!("Exported {} profiles to {}", count, args.path.display()),
    )
}

pub(super) async fn run_import(
    controller: &RollbackController,
    args: PathArgs,
    format: &OutputFormat,
) -> Result<()> {
    let receipts = controller.import(&args.path).await?;
    emit(format, &receipts, || {
        let mut lines = vec![format!(
            "Imported {} profiles from {}",
            receipts.len(),
            args.path.display()
        )];
        for receipt in &receipts {
            lines.push(format!(
                "  {} v{}, evaluating until {}",
                receipt.identifier,
                receipt.version,
                receipt.deadline.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        lines.push("Confirm each profile once it behaves.".to_string());
        lines.join("\n")
    })
}

pub(super) async fn run_wipe(
    controller: &RollbackController,
    args: WipeArgs,
    format: &OutputFormat,
) -> Result<()> {
    if !args.yes {
        println!("This will delete ALL profiles and the whole history ledger.");
        println!("Run with --yes to confirm.");
        return Ok(());
    }

    controller.wipe_all().await?;
    emit(format, &serde_json::json!({ "wiped": true }), || {
        "Store wiped.".to_string()
    })
}

/// Show or change the settings file at `path`. Runs without opening the store.
pub(super) fn run_settings(
    args: SettingsArgs,
    mut settings: Settings,
    path: &Path,
    format: &OutputFormat,
) -> Result<()> {
    match args.command.unwrap_or(SettingsCommands::Show) {
        SettingsCommands::Show => emit(format, &settings, || {
            serde_json::to_string_pretty(&settings).unwrap_or_default()
        }),
        SettingsCommands::Get { key } => {
            let value = settings.get_key(&key)?;
            emit(format, &serde_json::json!({ "key": key, "value": value }), || {
                value.clone()
            })
        }
        SettingsCommands::Set { key, value } => {
            settings.set_key(&key, &value)?;
            settings.save_to(path)?;
            tracing::info!("Updated {} in {:?}", key, path);
            emit(
                format,
                &serde_json::json!({ "key": key, "value": settings.get_key(&key)? }),
                || format!("Setting '{}' updated.", key),
            )
        }
        SettingsCommands::Reset => {
            Settings::default().save_clean_to(path)?;
            emit(format, &serde_json::json!({ "reset": true }), || {
                "Settings reset to defaults.".to_string()
            })
        }
    }
}
