// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io;

use mxd::error::MxdError;
use mxd::profile::{ProfileId, SchemaRegistry, SettingValue, SettingsMap};

#[test]
fn test_io_error_conversion() {
    let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "read-only medium");
    let mxd_error: MxdError = io_error.into();

    match mxd_error {
        MxdError::Io(_) => {} // Expected
        _ => panic!("Expected Io error, got different error type"),
    }
}

#[test]
fn test_config_error_display() {
    let error = MxdError::Config("bad window".to_string());
    assert_eq!(error.to_string(), "Configuration error: bad window");
}

#[test]
fn test_recovery_error_display() {
    let error = MxdError::Recovery("cannot read shards".to_string());
    assert_eq!(error.to_string(), "Recovery failed: cannot read shards");
    assert!(error.is_fatal());
}

#[test]
fn test_json_error_conversion() {
    let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let mxd_error: MxdError = err.into();
    assert!(matches!(mxd_error, MxdError::Json(_)));
    assert!(!mxd_error.is_fatal());
}

#[test]
fn test_empty_identifier_is_invalid_input() {
    assert!(matches!(
        "   ".parse::<ProfileId>(),
        Err(MxdError::InvalidInput(_))
    ));
}

#[test]
fn test_schema_violation_names_key() {
    let registry = SchemaRegistry::builtin();
    let mut settings = SettingsMap::new();
    settings.insert("fps_cap".to_string(), SettingValue::Integer(5000));

    let err = registry
        .validate(&ProfileId::app("game1").unwrap(), &settings)
        .unwrap_err();
    match err {
        MxdError::SchemaViolation {
            identifier, key, ..
        } => {
            assert_eq!(identifier, "game1");
            assert_eq!(key, "fps_cap");
        }
        other => panic!("Expected SchemaViolation, got {:?}", other),
    }
}

#[test]
fn test_unknown_setting_is_schema_violation() {
    let registry = SchemaRegistry::builtin();
    let mut settings = SettingsMap::new();
    // Global settings are not valid for an app profile.
    settings.insert("cpu_priority_boost".to_string(), SettingValue::Bool(true));

    assert!(matches!(
        registry.validate(&ProfileId::app("game1").unwrap(), &settings),
        Err(MxdError::SchemaViolation { .. })
    ));
    assert!(registry.validate(&ProfileId::Global, &settings).is_ok());
}
