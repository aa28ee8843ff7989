// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Setting schemas
//!
//! Every setting name a profile may carry is declared here, per category,
//! together with its type and accepted range. Validation never coerces: an
//! integer is not accepted where a float is declared and vice versa.
//!
//! Extra settings can be declared in a TOML file:
//!
//! ```toml
//! [app.texture_quality]
//! kind = "choice"
//! options = ["low", "medium", "high"]
//!
//! [global.timer_resolution_us]
//! kind = "integer"
//! min = 500
//! max = 15600
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{ProfileId, SettingValue, SettingsMap};
use crate::error::{MxdError, Result};

/// Schema category of an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Global,
    App,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::Global => "global",
            Category::App => "app",
        }
    }
}

/// Declared type and range of one setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SettingSpec {
    Integer { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Boolean,
    Choice { options: Vec<String> },
}

impl SettingSpec {
    fn choice(options: &[&str]) -> Self {
        SettingSpec::Choice {
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Check a value against this spec, returning the rejection reason.
    pub fn check(&self, value: &SettingValue) -> std::result::Result<(), String> {
        match (self, value) {
            (SettingSpec::Integer { min, max }, SettingValue::Integer(v)) => {
                if v < min {
                    Err(format!("value {} is below minimum {}", v, min))
                } else if v > max {
                    Err(format!("value {} is above maximum {}", v, max))
                } else {
                    Ok(())
                }
            }
            (SettingSpec::Float { min, max }, SettingValue::Float(v)) => {
                if !v.is_finite() {
                    Err(format!("value {} is not a finite number", v))
                } else if v < min {
                    Err(format!("value {} is below minimum {}", v, min))
                } else if v > max {
                    Err(format!("value {} is above maximum {}", v, max))
                } else {
                    Ok(())
                }
            }
            (SettingSpec::Boolean, SettingValue::Bool(_)) => Ok(()),
            (SettingSpec::Choice { options }, SettingValue::Choice(v)) => {
                if options.iter().any(|o| o == v) {
                    Ok(())
                } else {
                    Err(format!(
                        "'{}' is not one of: {}",
                        v,
                        options.join(", ")
                    ))
                }
            }
            (spec, value) => Err(format!(
                "expected {}, got {}",
                spec.type_name(),
                value.type_name()
            )),
        }
    }

    /// Parse a raw command-line string into the type this spec declares.
    pub fn parse(&self, raw: &str) -> std::result::Result<SettingValue, String> {
        let raw = raw.trim();
        let value = match self {
            SettingSpec::Integer { .. } => raw
                .parse::<i64>()
                .map(SettingValue::Integer)
                .map_err(|_| format!("'{}' is not an integer", raw))?,
            SettingSpec::Float { .. } => raw
                .parse::<f64>()
                .map(SettingValue::Float)
                .map_err(|_| format!("'{}' is not a number", raw))?,
            SettingSpec::Boolean => match raw.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => SettingValue::Bool(true),
                "false" | "off" | "no" | "0" => SettingValue::Bool(false),
                _ => return Err(format!("'{}' is not a boolean", raw)),
            },
            SettingSpec::Choice { .. } => SettingValue::Choice(raw.to_string()),
        };
        self.check(&value)?;
        Ok(value)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SettingSpec::Integer { .. } => "integer",
            SettingSpec::Float { .. } => "float",
            SettingSpec::Boolean => "boolean",
            SettingSpec::Choice { .. } => "choice",
        }
    }

    /// Human readable summary, e.g. `integer 0..=1000`.
    pub fn describe(&self) -> String {
        match self {
            SettingSpec::Integer { min, max } => format!("integer {}..={}", min, max),
            SettingSpec::Float { min, max } => format!("float {}..={}", min, max),
            SettingSpec::Boolean => "boolean".to_string(),
            SettingSpec::Choice { options } => format!("choice [{}]", options.join("|")),
        }
    }

    fn sanity_check(&self, key: &str) -> Result<()> {
        let ok = match self {
            SettingSpec::Integer { min, max } => min <= max,
            SettingSpec::Float { min, max } => min.is_finite() && max.is_finite() && min <= max,
            SettingSpec::Boolean => true,
            SettingSpec::Choice { options } => !options.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(MxdError::Config(format!(
                "invalid schema declaration for '{}': {}",
                key,
                self.describe()
            )))
        }
    }
}

/// Additional settings loaded from a TOML schema file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaExtension {
    #[serde(default)]
    pub global: BTreeMap<String, SettingSpec>,
    #[serde(default)]
    pub app: BTreeMap<String, SettingSpec>,
}

impl SchemaExtension {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

/// All known settings, by category
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    global: BTreeMap<String, SettingSpec>,
    app: BTreeMap<String, SettingSpec>,
}

/// Upscaling modes understood by the app schema.
pub const UPSCALING_MODES: &[&str] = &[
    "none",
    "dlss_quality",
    "dlss_balanced",
    "dlss_performance",
    "dlss_ultra_performance",
    "fsr2_quality",
    "fsr2_balanced",
    "fsr2_performance",
    "fsr2_ultra_quality",
    "fsr3_quality",
    "fsr3_balanced",
    "fsr3_performance",
    "xess_quality",
    "xess_balanced",
    "xess_performance",
    "xess_ultra_quality",
];

pub const OPTIMIZATION_LEVELS: &[&str] = &["conservative", "balanced", "aggressive", "ultra"];

const RESOLUTIONS: &[&str] = &[
    "1280x720",
    "1600x900",
    "1920x1080",
    "2560x1440",
    "3440x1440",
    "3840x2160",
];

impl SchemaRegistry {
    /// Built-in schema for system-wide and per-game tuning.
    pub fn builtin() -> Self {
        let mut app = BTreeMap::new();
        app.insert(
            "fps_cap".to_string(),
            SettingSpec::Integer { min: 0, max: 1000 },
        );
        app.insert(
            "target_fps".to_string(),
            SettingSpec::Integer { min: 30, max: 1000 },
        );
        app.insert("resolution".to_string(), SettingSpec::choice(RESOLUTIONS));
        app.insert("upscaling".to_string(), SettingSpec::choice(UPSCALING_MODES));
        for flag in [
            "frame_generation",
            "dynamic_resolution",
            "ray_tracing",
            "variable_rate_shading",
            "low_latency_mode",
        ] {
            app.insert(flag.to_string(), SettingSpec::Boolean);
        }
        app.insert(
            "optimization_level".to_string(),
            SettingSpec::choice(OPTIMIZATION_LEVELS),
        );
        app.insert(
            "render_scale".to_string(),
            SettingSpec::Float {
                min: 0.25,
                max: 2.0,
            },
        );

        let mut global = BTreeMap::new();
        for flag in [
            "cpu_priority_boost",
            "memory_optimization",
            "storage_optimization",
            "network_optimization",
            "visual_effects_optimization",
            "background_apps_management",
            "power_plan_optimization",
            "gpu_memory_optimization",
        ] {
            global.insert(flag.to_string(), SettingSpec::Boolean);
        }
        global.insert(
            "optimization_level".to_string(),
            SettingSpec::choice(OPTIMIZATION_LEVELS),
        );
        global.insert(
            "cpu_usage_limit".to_string(),
            SettingSpec::Integer { min: 1, max: 100 },
        );

        Self { global, app }
    }

    /// Built-in schema plus the declarations of an extension file.
    pub fn with_extensions(path: &Path) -> Result<Self> {
        let mut registry = Self::builtin();
        registry.extend(SchemaExtension::load(path)?)?;
        Ok(registry)
    }

    /// Merge extra declarations; an extension may narrow or replace a
    /// built-in setting.
    pub fn extend(&mut self, extension: SchemaExtension) -> Result<()> {
        for (key, spec) in extension.global {
            spec.sanity_check(&key)?;
            self.global.insert(key, spec);
        }
        for (key, spec) in extension.app {
            spec.sanity_check(&key)?;
            self.app.insert(key, spec);
        }
        Ok(())
    }

    fn table(&self, category: Category) -> &BTreeMap<String, SettingSpec> {
        match category {
            Category::Global => &self.global,
            Category::App => &self.app,
        }
    }

    pub fn spec(&self, category: Category, key: &str) -> Option<&SettingSpec> {
        self.table(category).get(key)
    }

    /// Declared settings of a category, ordered by name.
    pub fn settings(&self, category: Category) -> impl Iterator<Item = (&String, &SettingSpec)> {
        self.table(category).iter()
    }

    /// Validate a full settings payload for an identifier.
    pub fn validate(&self, identifier: &ProfileId, settings: &SettingsMap) -> Result<()> {
        let category = identifier.category();
        for (key, value) in settings {
            let spec = self
                .spec(category, key)
                .ok_or_else(|| MxdError::SchemaViolation {
                    identifier: identifier.to_string(),
                    key: key.clone(),
                    reason: format!("unknown {} setting", category.label()),
                })?;
            spec.check(value).map_err(|reason| MxdError::SchemaViolation {
                identifier: identifier.to_string(),
                key: key.clone(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Parse a `key=value` assignment using the declared type of `key`.
    pub fn parse_assignment(
        &self,
        identifier: &ProfileId,
        assignment: &str,
    ) -> Result<(String, SettingValue)> {
        let (key, raw) = assignment.split_once('=').ok_or_else(|| {
            MxdError::InvalidInput(format!("expected key=value, got '{}'", assignment))
        })?;
        let key = key.trim();
        let category = identifier.category();
        let spec = self
            .spec(category, key)
            .ok_or_else(|| MxdError::SchemaViolation {
                identifier: identifier.to_string(),
                key: key.to_string(),
                reason: format!("unknown {} setting", category.label()),
            })?;
        let value = spec.parse(raw).map_err(|reason| MxdError::SchemaViolation {
            identifier: identifier.to_string(),
            key: key.to_string(),
            reason,
        })?;
        Ok((key.to_string(), value))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
