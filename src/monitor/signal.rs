// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Condition signals
//!
//! A condition signal is whatever tells us whether the system is still
//! healthy after an apply. The store never measures anything itself.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{MxdError, Result};
use crate::profile::ProfileId;

/// One observation of the system's condition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Acceptable,
    Degraded,
    /// Graded verdict, compared against the acceptance threshold
    Score(f32),
}

impl Verdict {
    /// Whether this verdict confirms the evaluated version.
    pub fn is_acceptable(&self, threshold: f32) -> bool {
        match self {
            Verdict::Acceptable => true,
            Verdict::Degraded => false,
            // NaN compares false: a broken score never confirms.
            Verdict::Score(score) => *score >= threshold,
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = MxdError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ok" | "acceptable" | "good" => Ok(Verdict::Acceptable),
            "degraded" | "bad" => Ok(Verdict::Degraded),
            other => other
                .parse::<f32>()
                .map(Verdict::Score)
                .map_err(|_| MxdError::InvalidInput(format!("unrecognized verdict '{}'", s.trim()))),
        }
    }
}

/// Source of verdicts for an identifier under evaluation
#[async_trait]
pub trait ConditionSignal: Send + Sync {
    async fn sample(&self, identifier: &ProfileId) -> Result<Verdict>;
}

/// Replays a fixed sequence of verdicts, then repeats a fallback.
pub struct ScriptedSignal {
    script: Mutex<VecDeque<Verdict>>,
    fallback: Verdict,
}

impl ScriptedSignal {
    pub fn new(script: impl IntoIterator<Item = Verdict>, fallback: Verdict) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
        }
    }

    /// Always the same verdict.
    pub fn constant(verdict: Verdict) -> Self {
        Self::new([], verdict)
    }
}

#[async_trait]
impl ConditionSignal for ScriptedSignal {
    async fn sample(&self, _identifier: &ProfileId) -> Result<Verdict> {
        let mut script = self
            .script
            .lock()
            .map_err(|_| MxdError::InvalidInput("verdict script poisoned".to_string()))?;
        Ok(script.pop_front().unwrap_or(self.fallback))
    }
}

/// Reads the verdict from a file written by an external monitor.
///
/// The file holds `ok`, `degraded` or a score such as `0.72`. A missing
/// file means nothing has been reported yet and counts as acceptable.
pub struct FileSignal {
    path: PathBuf,
}

impl FileSignal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConditionSignal for FileSignal {
    async fn sample(&self, _identifier: &ProfileId) -> Result<Verdict> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content.parse(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Verdict::Acceptable),
            Err(e) => Err(e.into()),
        }
    }
}
