// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Per-identifier serialization
//!
//! Every mutation of an identifier happens while holding its
//! [`IdentifierGuard`]. The transaction writer refuses transactions whose
//! identifier does not match the guard it is handed.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::profile::ProfileId;

/// Proof of exclusive access to one identifier
pub struct IdentifierGuard {
    identifier: ProfileId,
    _guard: OwnedMutexGuard<()>,
}

impl IdentifierGuard {
    pub fn identifier(&self) -> &ProfileId {
        &self.identifier
    }
}

impl std::fmt::Debug for IdentifierGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierGuard")
            .field("identifier", &self.identifier)
            .finish()
    }
}

#[derive(Default)]
pub(crate) struct KeyedLocks {
    locks: Mutex<HashMap<ProfileId, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub(crate) async fn acquire(&self, identifier: &ProfileId) -> IdentifierGuard {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(identifier.clone()).or_default().clone()
        };
        IdentifierGuard {
            identifier: identifier.clone(),
            _guard: lock.lock_owned().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_identifier_is_exclusive() {
        let locks = Arc::new(KeyedLocks::default());
        let id = ProfileId::app("game1").unwrap();

        let guard = locks.acquire(&id).await;
        let second = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move { locks.acquire(&id).await.identifier().clone() })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        drop(guard);
        assert_eq!(second.await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_different_identifiers_do_not_block() {
        let locks = KeyedLocks::default();
        let _a = locks.acquire(&ProfileId::app("a").unwrap()).await;
        let b = tokio::time::timeout(
            Duration::from_millis(200),
            locks.acquire(&ProfileId::app("b").unwrap()),
        )
        .await;
        assert!(b.is_ok());
    }
}
