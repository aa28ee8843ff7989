// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Stability monitor
//!
//! Samples a [`ConditionSignal`] across an evaluation window: waits for the
//! system to settle, then checks at a fixed interval. The first sample
//! that is not acceptable reverts the version; if every sample was
//! acceptable the version is confirmed shortly before the window closes.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{ConditionSignal, EvaluationState, Resolution, RollbackController, Verdict};
use crate::error::Result;
use crate::profile::ProfileId;

/// How a watch ended
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// The monitor confirmed or rolled back the version it watched
    Decided(Resolution),
    /// Something else resolved the evaluation first
    Ended,
    /// Nothing was being evaluated when the watch started
    NotEvaluating,
}

pub struct StabilityMonitor {
    controller: RollbackController,
    signal: Arc<dyn ConditionSignal>,
    settle: Duration,
    interval: Duration,
}

impl StabilityMonitor {
    /// Monitor with the controller's configured settle delay and interval.
    pub fn new(controller: RollbackController, signal: Arc<dyn ConditionSignal>) -> Self {
        let settle = controller.config().settle();
        let interval = controller.config().check_interval();
        Self {
            controller,
            signal,
            settle,
            interval,
        }
    }

    pub fn with_timing(mut self, settle: Duration, interval: Duration) -> Self {
        self.settle = settle;
        self.interval = interval;
        self
    }

    /// Watch the evaluation currently open for `identifier`.
    pub async fn watch(&self, identifier: &ProfileId) -> Result<WatchOutcome> {
        let EvaluationState::Evaluating {
            version, deadline, ..
        } = self.controller.state(identifier)
        else {
            return Ok(WatchOutcome::NotEvaluating);
        };
        let margin = chrono::Duration::from_std(self.interval * 2)
            .unwrap_or_else(|_| chrono::Duration::zero());

        tracing::debug!(identifier = %identifier, version, "Watching evaluation");
        tokio::time::sleep(self.settle).await;

        loop {
            if !self.still_watching(identifier, version) {
                return Ok(WatchOutcome::Ended);
            }

            let verdict = self.signal.sample(identifier).await?;
            tracing::debug!(identifier = %identifier, version, ?verdict, "Sampled condition");

            let threshold = self.controller.config().acceptance_threshold;
            if !verdict.is_acceptable(threshold) || Utc::now() + margin > deadline {
                return self.decide(identifier, version, verdict).await;
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Keep watching while rollbacks start new evaluations; returns the
    /// last outcome.
    pub async fn follow(&self, identifier: &ProfileId) -> Result<WatchOutcome> {
        loop {
            let outcome = self.watch(identifier).await?;
            if !matches!(outcome, WatchOutcome::Decided(Resolution::RolledBack { .. })) {
                return Ok(outcome);
            }
        }
    }

    /// Run [`follow`](Self::follow) in the background.
    pub fn spawn(self: Arc<Self>, identifier: ProfileId) -> JoinHandle<Result<WatchOutcome>> {
        tokio::spawn(async move { self.follow(&identifier).await })
    }

    fn still_watching(&self, identifier: &ProfileId, version: u64) -> bool {
        matches!(
            self.controller.state(identifier),
            EvaluationState::Evaluating { version: v, .. } if v == version
        )
    }

    async fn decide(
        &self,
        identifier: &ProfileId,
        version: u64,
        verdict: Verdict,
    ) -> Result<WatchOutcome> {
        let resolution = self
            .controller
            .report_for(identifier, version, verdict)
            .await?;
        Ok(match resolution {
            Some(resolution) => WatchOutcome::Decided(resolution),
            None => WatchOutcome::Ended,
        })
    }
}
