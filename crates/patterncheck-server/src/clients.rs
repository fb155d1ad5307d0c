// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP clients for the external collaborators.
//!
//! The task catalog and the artifact storage are separate services; the
//! orchestrator only knows their base URLs. Failures map onto the advisory
//! error variants: the sequencer logs and degrades instead of failing the
//! request.

use async_trait::async_trait;
use patterncheck_core::error::{CoreError, Result};
use patterncheck_core::sequencer::{ReviewArtifacts, TaskCatalog};
use serde::Deserialize;
use uuid::Uuid;

/// Task metadata served by the catalog.
#[derive(Debug, Clone, Deserialize)]
struct TaskInfo {
    title: String,
    pattern: String,
}

/// Task catalog over HTTP: `GET {base}/tasks/{task_id}` returns the task
/// metadata or 404.
pub struct HttpTaskCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTaskCatalog {
    /// Create a catalog client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn fetch(&self, task_id: &str) -> Result<Option<TaskInfo>> {
        let url = format!("{}/tasks/{}", self.base_url, task_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::CatalogUnavailable {
                details: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| CoreError::CatalogUnavailable {
                details: e.to_string(),
            })?;
        let info = response
            .json::<TaskInfo>()
            .await
            .map_err(|e| CoreError::CatalogUnavailable {
                details: e.to_string(),
            })?;
        Ok(Some(info))
    }
}

#[async_trait]
impl TaskCatalog for HttpTaskCatalog {
    async fn task_exists(&self, task_id: &str) -> Result<bool> {
        Ok(self.fetch(task_id).await?.is_some())
    }

    async fn task_title(&self, task_id: &str) -> Result<String> {
        match self.fetch(task_id).await? {
            Some(info) => Ok(info.title),
            None => Err(CoreError::CatalogUnavailable {
                details: format!("no metadata for task '{}'", task_id),
            }),
        }
    }

    async fn pattern_title(&self, task_id: &str) -> Result<String> {
        match self.fetch(task_id).await? {
            Some(info) => Ok(info.pattern),
            None => Err(CoreError::CatalogUnavailable {
                details: format!("no metadata for task '{}'", task_id),
            }),
        }
    }
}

/// Artifact storage over HTTP: submissions are PUT, review texts are GET.
pub struct HttpReviewArtifacts {
    client: reqwest::Client,
    base_url: String,
}

impl HttpReviewArtifacts {
    /// Create a storage client for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ReviewArtifacts for HttpReviewArtifacts {
    async fn store_submission(&self, correlation_id: Uuid, archive: &[u8]) -> Result<()> {
        let url = format!("{}/submissions/{}", self.base_url, correlation_id);
        self.client
            .put(&url)
            .body(archive.to_vec())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| CoreError::StorageUnavailable {
                details: e.to_string(),
            })?;
        Ok(())
    }

    async fn fetch_review(&self, correlation_id: Uuid) -> Result<Option<String>> {
        let url = format!("{}/reviews/{}", self.base_url, correlation_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::StorageUnavailable {
                details: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| CoreError::StorageUnavailable {
                details: e.to_string(),
            })?;
        let text = response
            .text()
            .await
            .map_err(|e| CoreError::StorageUnavailable {
                details: e.to_string(),
            })?;
        Ok(Some(text))
    }
}
