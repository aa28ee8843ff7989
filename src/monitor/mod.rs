// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Stability monitoring and rollback
//!
//! Every apply opens a bounded evaluation window for its identifier. The
//! window ends with a confirmation (the version becomes last known good) or
//! a revert (degradation report, cancellation, timeout). A revert restores
//! the last-good payload as a new version, which gets its own window.

mod controller;
mod signal;
mod stability;

pub use controller::{ApplyReceipt, EvaluationState, Resolution, ResumeOutcome, RollbackController};
pub use signal::{ConditionSignal, FileSignal, ScriptedSignal, Verdict};
pub use stability::{StabilityMonitor, WatchOutcome};

use serde::Serialize;

use crate::profile::ProfileId;

/// Why a version was rolled back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackReason {
    /// The condition signal reported degradation
    Degraded,
    /// The evaluation window expired without confirmation
    Timeout,
    /// The caller cancelled the evaluation
    Cancelled,
    /// Another apply arrived while the version was still provisional
    Superseded,
}

impl RollbackReason {
    pub fn label(&self) -> &'static str {
        match self {
            RollbackReason::Degraded => "degraded",
            RollbackReason::Timeout => "timeout",
            RollbackReason::Cancelled => "cancelled",
            RollbackReason::Superseded => "superseded",
        }
    }
}

impl std::fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Event delivered to subscribers of [`RollbackController::subscribe`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// `from_version` was undone. `to_version` is the version now in
    /// effect: a restored copy of the last-good payload, or the prior
    /// version when the undo was caused by a superseding apply.
    RolledBack {
        identifier: ProfileId,
        from_version: u64,
        to_version: Option<u64>,
        reason: RollbackReason,
    },
    /// A revert was required but nothing confirmed-good exists to restore;
    /// `version` stays in effect.
    NoRollbackTarget {
        identifier: ProfileId,
        version: u64,
        reason: RollbackReason,
    },
}

impl Notification {
    pub fn identifier(&self) -> &ProfileId {
        match self {
            Notification::RolledBack { identifier, .. } => identifier,
            Notification::NoRollbackTarget { identifier, .. } => identifier,
        }
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::RolledBack {
                identifier,
                from_version,
                to_version: Some(to),
                reason,
            } => write!(
                f,
                "{}: rolled back v{} -> v{} ({})",
                identifier, from_version, to, reason
            ),
            Notification::RolledBack {
                identifier,
                from_version,
                to_version: None,
                reason,
            } => write!(
                f,
                "{}: rolled back v{}, no version in effect ({})",
                identifier, from_version, reason
            ),
            Notification::NoRollbackTarget {
                identifier,
                version,
                reason,
            } => write!(
                f,
                "{}: v{} is degraded ({}) but there is no confirmed-good version to restore",
                identifier, version, reason
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_json_shape() {
        let n = Notification::RolledBack {
            identifier: ProfileId::app("game1").unwrap(),
            from_version: 2,
            to_version: Some(3),
            reason: RollbackReason::Timeout,
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event"], "rolled_back");
        assert_eq!(json["identifier"], "game1");
        assert_eq!(json["reason"], "timeout");
        assert_eq!(json["to_version"], 3);
    }

    #[test]
    fn test_notification_display() {
        let n = Notification::NoRollbackTarget {
            identifier: ProfileId::Global,
            version: 1,
            reason: RollbackReason::Degraded,
        };
        let text = n.to_string();
        assert!(text.starts_with("global: v1"));
        assert!(text.contains("no confirmed-good"));
        assert_eq!(n.identifier(), &ProfileId::Global);
    }
}
