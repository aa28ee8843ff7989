// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! mxd - versioned settings profiles with automatic rollback
//!
//! Entry point for the mxd CLI application.

use anyhow::Context;
use clap::Parser;

use mxd::cli::{Cli, Commands, StatusArgs};
use mxd::config::Settings;
use mxd::monitor::RollbackController;

#[path = "main/cli_commands.rs"]
mod cli_commands;

use cli_commands::{
    report_resumed, run_apply, run_cancel, run_confirm, run_export, run_import, run_ledger,
    run_report, run_schema, run_settings, run_show, run_status, run_versions, run_watch, run_wipe,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // `-v` shows store and controller decisions, `-vv` everything.
    // `RUST_LOG` still takes precedence.
    let level = match cli.verbose {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    };
    if let Some(level) = level {
        if let Ok(parsed) = format!("mxd={}", level).parse() {
            env_filter = env_filter.add_directive(parsed);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    // Load settings
    let settings_path = cli.config.clone().unwrap_or_else(Settings::default_path);
    let mut settings = Settings::load_from(&settings_path).with_context(|| {
        format!("failed to load settings from {}", settings_path.display())
    })?;

    // Settings are edited without touching the store.
    let command = match cli.command {
        Some(Commands::Settings(args)) => {
            run_settings(args, settings, &settings_path, &cli.format)?;
            return Ok(());
        }
        command => command,
    };

    if let Some(dir) = cli.data_dir {
        settings.store.data_dir = Some(dir);
    }

    let (controller, resumed) = RollbackController::open(&settings)
        .await
        .map_err(|e| {
            if e.is_fatal() {
                tracing::error!("Store at {:?} cannot be recovered: {}", settings.data_dir(), e);
            }
            e
        })
        .with_context(|| format!("failed to open store at {}", settings.data_dir().display()))?;
    report_resumed(&resumed, &cli.format)?;

    // Dispatch to appropriate command
    let format = cli.format;
    match command {
        None => run_status(&controller, StatusArgs::default(), &format).await?,
        Some(Commands::Apply(args)) => run_apply(&controller, args, &format).await?,
        Some(Commands::Confirm(args)) => run_confirm(&controller, args, &format).await?,
        Some(Commands::Cancel(args)) => run_cancel(&controller, args, &format).await?,
        Some(Commands::Report(args)) => run_report(&controller, args, &format).await?,
        Some(Commands::Show(args)) => run_show(&controller, args, &format).await?,
        Some(Commands::Versions(args)) => run_versions(&controller, args, &format).await?,
        Some(Commands::Ledger(args)) => run_ledger(&controller, args, &format).await?,
        Some(Commands::Status(args)) => run_status(&controller, args, &format).await?,
        Some(Commands::Watch(args)) => run_watch(&controller, args, &format).await?,
        Some(Commands::Schema(args)) => run_schema(&controller, args, &format)?,
        Some(Commands::Export(args)) => run_export(&controller, args, &format).await?,
        Some(Commands::Import(args)) => run_import(&controller, args, &format).await?,
        Some(Commands::Wipe(args)) => run_wipe(&controller, args, &format).await?,
        // Handled before the store was opened
        Some(Commands::Settings(_)) => {}
    }

    Ok(())
}
