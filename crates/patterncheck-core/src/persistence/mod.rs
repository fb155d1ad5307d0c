// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for checking records.
//!
//! This module defines the durable store abstraction and backend
//! implementations. One record per submission check, keyed by correlation id,
//! never physically deleted by the core (retention is an external concern).

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patterncheck_contracts::Stage;
use uuid::Uuid;

use crate::error::CoreError;
use crate::state::CheckStatus;

/// Recorded outcome of one stage attempt.
///
/// Write-once per attempt: a later stage's event never alters an earlier
/// stage's recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    /// Whether the worker succeeded.
    pub success: bool,
    /// Worker output text (compiler log excerpt, verification report, review).
    pub message: String,
}

/// Live timeout token for the currently active stage.
///
/// At most one per checking. A durable deadline message whose token does not
/// match this record was disarmed by a real stage outcome and is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedTimeout {
    /// Stage the deadline was armed for.
    pub stage: Stage,
    /// Token issued when the deadline was armed.
    pub token: Uuid,
}

/// Durable record of one submission check.
#[derive(Debug, Clone, PartialEq)]
pub struct Checking {
    /// Correlation id, primary key; shared by every event of this check.
    pub correlation_id: Uuid,
    /// Submitting user, copied at creation.
    pub user_id: String,
    /// Target task, copied at creation.
    pub task_id: String,
    /// Human-readable task title, copied at creation.
    pub task_name: String,
    /// Title of the design pattern the task teaches, copied at creation so
    /// the review request can be published without a catalog round-trip.
    pub pattern_name: String,
    /// Current pipeline status.
    pub status: CheckStatus,
    /// Compile stage outcome, once resolved.
    pub compiled: Option<StageOutcome>,
    /// Verification stage outcome, once resolved.
    pub tested: Option<StageOutcome>,
    /// Review stage outcome, once resolved.
    pub reviewed: Option<StageOutcome>,
    /// Timeout token for the active stage, if armed.
    pub active_timeout: Option<ArmedTimeout>,
    /// When the checking was created.
    pub created_at: DateTime<Utc>,
    /// Set exactly once, on the first transition into a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Checking {
    /// Create a fresh checking entering the compile stage.
    pub fn new(
        correlation_id: Uuid,
        user_id: impl Into<String>,
        task_id: impl Into<String>,
        task_name: impl Into<String>,
        pattern_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id,
            user_id: user_id.into(),
            task_id: task_id.into(),
            task_name: task_name.into(),
            pattern_name: pattern_name.into(),
            status: CheckStatus::Compiling,
            compiled: None,
            tested: None,
            reviewed: None,
            active_timeout: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// Recorded outcome for the given stage.
    pub fn outcome(&self, stage: Stage) -> Option<&StageOutcome> {
        match stage {
            Stage::Compile => self.compiled.as_ref(),
            Stage::Verify => self.tested.as_ref(),
            Stage::Review => self.reviewed.as_ref(),
        }
    }
}

/// Durable keyed storage of checking records.
///
/// Implementations must support concurrent access for different correlation
/// ids; updates for the same id are serialized by the orchestration handlers
/// (single-writer-per-key), not by the store.
#[async_trait]
pub trait CheckingStore: Send + Sync {
    /// Insert the record unless one already exists for its correlation id.
    ///
    /// Returns `true` when the record was created, `false` when the
    /// correlation id was replayed and the existing record was kept.
    async fn create_if_absent(&self, checking: &Checking) -> Result<bool, CoreError>;

    /// Load the record for a correlation id.
    async fn load(&self, correlation_id: Uuid) -> Result<Option<Checking>, CoreError>;

    /// Persist the record, replacing the stored state.
    ///
    /// Fails with [`CoreError::CheckingNotFound`] when no record exists;
    /// records are only brought into being via [`Self::create_if_absent`].
    async fn save(&self, checking: &Checking) -> Result<(), CoreError>;

    /// Store reachability check for health reporting.
    async fn health_check(&self) -> Result<bool, CoreError>;
}
