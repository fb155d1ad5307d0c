// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory checking store for tests and embedded wiring.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::CoreError;

use super::{Checking, CheckingStore};

/// Checking store backed by a process-local map.
///
/// Loses everything on restart; use [`super::SqliteStore`] when durability
/// matters.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<Uuid, Checking>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckingStore for MemoryStore {
    async fn create_if_absent(&self, checking: &Checking) -> Result<bool, CoreError> {
        let mut map = self.inner.write().await;
        if map.contains_key(&checking.correlation_id) {
            return Ok(false);
        }
        map.insert(checking.correlation_id, checking.clone());
        Ok(true)
    }

    async fn load(&self, correlation_id: Uuid) -> Result<Option<Checking>, CoreError> {
        Ok(self.inner.read().await.get(&correlation_id).cloned())
    }

    async fn save(&self, checking: &Checking) -> Result<(), CoreError> {
        let mut map = self.inner.write().await;
        match map.get_mut(&checking.correlation_id) {
            Some(stored) => {
                *stored = checking.clone();
                Ok(())
            }
            None => Err(CoreError::CheckingNotFound {
                correlation_id: checking.correlation_id,
            }),
        }
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        Ok(true)
    }
}
