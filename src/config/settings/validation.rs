// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::error::{MxdError, Result};
use crate::profile::SchemaRegistry;

use super::Settings;

impl Settings {
    /// Reject monitor settings that cannot describe a bounded evaluation.
    pub fn validate(&self) -> Result<()> {
        let monitor = &self.monitor;

        if monitor.evaluation_window_secs == 0 {
            return Err(MxdError::Config(
                "monitor.evaluation_window_secs must be greater than zero".to_string(),
            ));
        }
        if monitor.check_interval_secs == 0 {
            return Err(MxdError::Config(
                "monitor.check_interval_secs must be greater than zero".to_string(),
            ));
        }
        if monitor.check_interval_secs > monitor.evaluation_window_secs {
            return Err(MxdError::Config(format!(
                "monitor.check_interval_secs ({}) exceeds the evaluation window ({})",
                monitor.check_interval_secs, monitor.evaluation_window_secs
            )));
        }
        if !(0.0..=1.0).contains(&monitor.acceptance_threshold) {
            return Err(MxdError::Config(format!(
                "monitor.acceptance_threshold must be within 0.0..=1.0, got {}",
                monitor.acceptance_threshold
            )));
        }
        Ok(())
    }

    /// Built-in schema plus the configured extension file, if any.
    pub fn schema_registry(&self) -> Result<SchemaRegistry> {
        match &self.schema.extensions_path {
            Some(path) => SchemaRegistry::with_extensions(path),
            None => Ok(SchemaRegistry::builtin()),
        }
    }
}
