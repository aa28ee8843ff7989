// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap
//!
//! Defines all command-line arguments and subcommands for mxd.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// mxd - versioned settings profiles with automatic rollback
#[derive(Parser, Debug)]
#[command(name = "mxd")]
#[command(version, about = "Versioned settings profiles with automatic rollback")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store directory (overrides `store.data_dir`)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Defaults to `status` when omitted
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply settings to a profile and open an evaluation window
    Apply(ApplyArgs),

    /// Confirm the version under evaluation as known good
    Confirm(TargetArgs),

    /// Cancel the evaluation and restore the last known good version
    #[command(alias = "revert")]
    Cancel(TargetArgs),

    /// Report the observed condition for a version under evaluation
    Report(ReportArgs),

    /// Show a profile version (the effective one by default)
    #[command(disable_version_flag = true)]
    Show(ShowArgs),

    /// List every stored version of a profile
    Versions(TargetArgs),

    /// Show history ledger entries
    #[command(alias = "history")]
    Ledger(LedgerArgs),

    /// Show effective versions and open evaluations
    Status(StatusArgs),

    /// Stay attached and print rollback notifications
    Watch(WatchArgs),

    /// List the settings a profile may carry
    Schema(SchemaArgs),

    /// Write the effective profiles to a JSON bundle
    Export(PathArgs),

    /// Apply every profile from a JSON bundle
    Import(PathArgs),

    /// Delete every profile and the whole ledger
    Wipe(WipeArgs),

    /// View or change mxd settings
    Settings(SettingsArgs),
}

/// Arguments for the apply command
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Profile identifier (`global` or an application key)
    pub identifier: String,

    /// Settings as key=value pairs
    #[arg(required = true)]
    pub settings: Vec<String>,
}

/// Arguments naming a single profile
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Profile identifier
    pub identifier: String,
}

/// Arguments for the report command
#[derive(Args, Debug)]
#[command(group(
    clap::ArgGroup::new("verdict")
        .required(true)
        .args(["ok", "degraded", "score"])
))]
pub struct ReportArgs {
    /// Profile identifier
    pub identifier: String,

    /// The system is behaving acceptably
    #[arg(long)]
    pub ok: bool,

    /// The system degraded after the apply
    #[arg(long)]
    pub degraded: bool,

    /// Graded condition, compared against the acceptance threshold
    #[arg(long)]
    pub score: Option<f32>,
}

/// Arguments for the show command
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Profile identifier
    pub identifier: String,

    /// Specific version
    #[arg(long)]
    pub version: Option<u64>,
}

/// Arguments for the ledger command
#[derive(Args, Debug)]
pub struct LedgerArgs {
    /// Only entries for this identifier
    pub identifier: Option<String>,

    /// Maximum number of entries to show
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

/// Arguments for the status command
#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Only this identifier
    pub identifier: Option<String>,
}

/// Arguments for the watch command
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Signal file holding `ok`, `degraded` or a score; when given, open
    /// evaluations are decided from it
    #[arg(long)]
    pub signal_file: Option<PathBuf>,
}

/// Arguments for the settings command
#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// Defaults to `show` when omitted
    #[command(subcommand)]
    pub command: Option<SettingsCommands>,
}

/// Settings subcommands
#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Show current settings
    Show,

    /// Set a setting (e.g. "monitor.evaluation_window_secs")
    Set {
        /// Dotted setting key
        key: String,

        /// Value to set; "none" clears a path
        value: String,
    },

    /// Get a setting
    Get {
        /// Dotted setting key
        key: String,
    },

    /// Reset settings to defaults
    Reset,
}

/// Arguments for the schema command
#[derive(Args, Debug)]
pub struct SchemaArgs {
    /// Only settings of this scope
    #[arg(long)]
    pub scope: Option<SchemaScope>,
}

/// Arguments naming a bundle file
#[derive(Args, Debug)]
pub struct PathArgs {
    /// Bundle path
    pub path: PathBuf,
}

/// Arguments for the wipe command
#[derive(Args, Debug)]
pub struct WipeArgs {
    /// Skip confirmation
    #[arg(short = 'y', long)]
    pub yes: bool,
}

/// Settings scope for the schema listing
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum SchemaScope {
    Global,
    App,
}

/// Output format for command results
#[derive(ValueEnum, Clone, Debug, Default, PartialEq)]
pub enum OutputFormat {
    /// Plain text output
    #[default]
    Text,

    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    // ==================== CLI Global Arguments ====================

    #[test]
    fn test_cli_default_no_command() {
        let cli = Cli::parse_from(["mxd"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(cli.data_dir.is_none());
    }

    #[test]
    fn test_cli_verbose_multiple() {
        let cli = Cli::parse_from(["mxd", "-vv"]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_globals_after_subcommand() {
        let cli = Cli::parse_from(["mxd", "status", "--format", "json", "--data-dir", "/tmp/s"]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/s")));
    }

    // ==================== Subcommands ====================

    #[test]
    fn test_apply_collects_assignments() {
        let cli = Cli::parse_from(["mxd", "apply", "game1", "fps_cap=60", "vsync=false"]);
        match cli.command {
            Some(Commands::Apply(args)) => {
                assert_eq!(args.identifier, "game1");
                assert_eq!(args.settings, vec!["fps_cap=60", "vsync=false"]);
            }
            other => panic!("Expected Apply, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_requires_settings() {
        assert!(Cli::try_parse_from(["mxd", "apply", "game1"]).is_err());
    }

    #[test]
    fn test_report_requires_one_verdict() {
        assert!(Cli::try_parse_from(["mxd", "report", "game1"]).is_err());
        assert!(Cli::try_parse_from(["mxd", "report", "game1", "--ok", "--degraded"]).is_err());

        let cli = Cli::parse_from(["mxd", "report", "game1", "--score", "0.4"]);
        match cli.command {
            Some(Commands::Report(args)) => assert_eq!(args.score, Some(0.4)),
            other => panic!("Expected Report, got {:?}", other),
        }
    }

    #[test]
    fn test_cancel_alias() {
        let cli = Cli::parse_from(["mxd", "revert", "global"]);
        assert!(matches!(cli.command, Some(Commands::Cancel(_))));
    }

    #[test]
    fn test_ledger_limit() {
        let cli = Cli::parse_from(["mxd", "ledger", "-n", "5"]);
        match cli.command {
            Some(Commands::Ledger(args)) => {
                assert!(args.identifier.is_none());
                assert_eq!(args.limit, 5);
            }
            other => panic!("Expected Ledger, got {:?}", other),
        }
    }

    #[test]
    fn test_schema_scope() {
        let cli = Cli::parse_from(["mxd", "schema", "--scope", "app"]);
        match cli.command {
            Some(Commands::Schema(args)) => assert_eq!(args.scope, Some(SchemaScope::App)),
            other => panic!("Expected Schema, got {:?}", other),
        }
    }

    #[test]
    fn test_wipe_short_flag() {
        let cli = Cli::parse_from(["mxd", "wipe", "-y"]);
        match cli.command {
            Some(Commands::Wipe(args)) => assert!(args.yes),
            other => panic!("Expected Wipe, got {:?}", other),
        }
    }
}
