// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use serde_json::Value;

pub(super) const CURRENT_VERSION: u32 = 1;

/// Bring a raw settings document up to [`CURRENT_VERSION`].
///
/// Files without a `settings_version` predate versioning and are read as
/// version 1.
pub(super) fn migrate_on_load(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        let version = map
            .get("settings_version")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        if version < CURRENT_VERSION as u64 {
            map.insert("settings_version".to_string(), Value::from(CURRENT_VERSION));
        }
    }
    value
}

/// Lay `ours` over the document already on disk.
///
/// Objects merge key by key; anything else in `ours` replaces what was
/// there. Keys only the file knows about survive.
pub(super) fn deep_merge(on_disk: Value, ours: Value) -> Value {
    let (mut document, fields) = match (on_disk, ours) {
        (Value::Object(document), Value::Object(fields)) => (document, fields),
        (_, ours) => return ours,
    };
    for (key, value) in fields {
        let value = match document.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None => value,
        };
        document.insert(key, value);
    }
    Value::Object(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unversioned_file_is_stamped() {
        let migrated = migrate_on_load(json!({"monitor": {}}));
        assert_eq!(migrated["settings_version"], CURRENT_VERSION);
    }

    #[test]
    fn test_newer_version_left_alone() {
        let migrated = migrate_on_load(json!({"settings_version": 7}));
        assert_eq!(migrated["settings_version"], 7);
    }

    #[test]
    fn test_deep_merge_overlay_wins_and_keeps_unknown() {
        let merged = deep_merge(
            json!({"a": {"x": 1, "y": 2}, "b": true}),
            json!({"a": {"x": 5}}),
        );
        assert_eq!(merged, json!({"a": {"x": 5, "y": 2}, "b": true}));
    }
}
