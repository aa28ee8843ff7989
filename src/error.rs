// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for mxd
//!
//! Every fallible operation in the profile store, the ledger, the
//! transaction writer and the rollback controller returns [`MxdError`].

use thiserror::Error;

/// Main error type for mxd operations
#[derive(Error, Debug)]
pub enum MxdError {
    /// A setting key is unknown for the identifier's category, or its value
    /// does not satisfy the declared type/range. Raised before any write.
    #[error("Schema violation for '{identifier}' setting '{key}': {reason}")]
    SchemaViolation {
        identifier: String,
        key: String,
        reason: String,
    },

    /// Unknown identifier or version
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage unavailable. Before the durability barrier this aborts the
    /// transaction with no state change.
    #[error("IO failure: {0}")]
    Io(#[from] std::io::Error),

    /// Degradation detected but there is no confirmed-good history to fall
    /// back to; the degraded version stays active.
    #[error("No rollback target for '{identifier}': version {version} stays active, no confirmed-good history")]
    NoRollbackTarget { identifier: String, version: u64 },

    /// The durable medium could not be read while replaying staged
    /// transactions at startup. Fatal to the whole store.
    #[error("Recovery failed: {0}")]
    Recovery(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MxdError {
    /// Whether the enclosing application must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MxdError::Recovery(_))
    }

    pub(crate) fn not_found(identifier: impl std::fmt::Display) -> Self {
        MxdError::NotFound(format!("no profile for '{}'", identifier))
    }
}

/// Result type alias for mxd operations
pub type Result<T> = std::result::Result<T, MxdError>;

impl From<toml::de::Error> for MxdError {
    fn from(err: toml::de::Error) -> Self {
        MxdError::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for MxdError {
    fn from(err: toml::ser::Error) -> Self {
        MxdError::Toml(err.to_string())
    }
}
