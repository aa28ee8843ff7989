// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Default profiles seeded into an empty store.
//!
//! Seeded profiles are committed as confirmed-good, so they are valid
//! rollback targets from the first apply on.

use super::{ProfileId, SettingValue, SettingsMap};

/// Identifier and settings of every default profile.
pub fn default_profiles() -> Vec<(ProfileId, SettingsMap)> {
    vec![
        (
            ProfileId::App("Cyberpunk 2077".to_string()),
            settings(&[
                ("upscaling", "dlss_quality".into()),
                ("frame_generation", true.into()),
                ("dynamic_resolution", false.into()),
                ("optimization_level", "balanced".into()),
            ]),
        ),
        (
            ProfileId::App("The Witcher 3".to_string()),
            settings(&[
                ("upscaling", "fsr2_quality".into()),
                ("frame_generation", false.into()),
                ("dynamic_resolution", false.into()),
                ("optimization_level", "balanced".into()),
            ]),
        ),
    ]
}

fn settings(pairs: &[(&str, SettingValue)]) -> SettingsMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
