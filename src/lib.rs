// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! mxd - versioned settings profiles with automatic rollback.
//!
//! Settings profiles (one global, one per application) are stored as
//! immutable versions. Every change is evaluated for a bounded window and
//! either confirmed as last known good or rolled back to it.
//!
//! - `profile`: identifiers, typed setting values and the setting schema
//! - `store`: profile versions, the history ledger and the WAL-backed
//!   transaction writer that keeps both crash-consistent
//! - `monitor`: the rollback controller, condition signals and the
//!   stability monitor that decides evaluations
//! - `config`, `cli`: settings file and command-line surface of `mxd`

pub mod cli;
pub mod config;
pub mod error;
pub mod monitor;
pub mod profile;
pub mod store;

pub use error::{MxdError, Result};
