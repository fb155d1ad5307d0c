// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stage sequencer: the synchronous entry point over the asynchronous
//! pipeline.
//!
//! [`CheckSequencer::handle`] validates the task, starts the checking and
//! then observes the pipeline through three bounded waits on the completion
//! bridge. Stage requests are published by the auto-advancing state machine,
//! not from here; this module only composes the client-facing result.
//!
//! Every exit returns a structured [`CheckResult`] carrying a flag and a
//! free-text message per stage, so the client can render partial progress
//! when the pipeline halts early. The caller is never left hanging past the
//! sum of the stage deadlines actually consumed.

use std::sync::Arc;

use async_trait::async_trait;
use patterncheck_contracts::{Stage, StartChecking};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::bridge::StageSignal;
use crate::error::{CoreError, Result};
use crate::handlers::{self, OrchestratorState};
use crate::state::timeout_message;

/// Task catalog collaborator.
///
/// Existence decides whether a checking is created at all; title and pattern
/// lookups are advisory enrichment and their failures are logged, not
/// propagated.
#[async_trait]
pub trait TaskCatalog: Send + Sync {
    /// Whether the task exists.
    async fn task_exists(&self, task_id: &str) -> Result<bool>;

    /// Human-readable task title.
    async fn task_title(&self, task_id: &str) -> Result<String>;

    /// Title of the design pattern the task teaches.
    async fn pattern_title(&self, task_id: &str) -> Result<String>;
}

/// Artifact storage collaborator.
#[async_trait]
pub trait ReviewArtifacts: Send + Sync {
    /// Store the submitted source archive for the workers to pick up.
    async fn store_submission(&self, correlation_id: Uuid, archive: &[u8]) -> Result<()>;

    /// Fetch the persisted review text, if the reviewer stored one.
    async fn fetch_review(&self, correlation_id: Uuid) -> Result<Option<String>>;
}

/// Client-facing result of one check request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Correlation id of the checking, for status queries and cancellation.
    pub correlation_id: Uuid,
    /// Whether compilation succeeded.
    pub compiled: bool,
    /// Compiler output excerpt, empty if the stage was not attempted.
    pub compile_msg: String,
    /// Whether structural verification succeeded.
    pub tested: bool,
    /// Verification report, empty if the stage was not attempted.
    pub test_msg: String,
    /// Whether the review succeeded.
    pub reviewed: bool,
    /// Review explanation, empty if the stage was not attempted.
    pub review_msg: String,
    /// Whether the full pipeline ran to completion.
    pub finished: bool,
}

impl CheckResult {
    fn unattempted(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            compiled: false,
            compile_msg: String::new(),
            tested: false,
            test_msg: String::new(),
            reviewed: false,
            review_msg: String::new(),
            finished: false,
        }
    }
}

/// How one bounded stage wait ended.
enum WaitVerdict {
    /// The stage succeeded; carry on.
    Succeeded(String),
    /// The stage failed, timed out or was cancelled; halt with this message.
    Halted(String),
}

fn verdict(stage: Stage, signal: Option<StageSignal>) -> WaitVerdict {
    match signal {
        Some(StageSignal::Completed {
            success: true,
            message,
        }) => WaitVerdict::Succeeded(message),
        Some(StageSignal::Completed {
            success: false,
            message,
        }) => WaitVerdict::Halted(message),
        Some(StageSignal::DeadlineElapsed) => WaitVerdict::Halted(timeout_message(stage)),
        Some(StageSignal::Canceled) => WaitVerdict::Halted("checking canceled".to_string()),
        // Local wait expiry: the durable deadline message finalizes the
        // record; the response reports the timeout right away.
        None => WaitVerdict::Halted(timeout_message(stage)),
    }
}

/// Drives one submission check end-to-end for the synchronous API.
pub struct CheckSequencer {
    state: Arc<OrchestratorState>,
    catalog: Arc<dyn TaskCatalog>,
    artifacts: Arc<dyn ReviewArtifacts>,
}

impl CheckSequencer {
    /// Create a sequencer over the orchestrator state and its collaborators.
    pub fn new(
        state: Arc<OrchestratorState>,
        catalog: Arc<dyn TaskCatalog>,
        artifacts: Arc<dyn ReviewArtifacts>,
    ) -> Self {
        Self {
            state,
            catalog,
            artifacts,
        }
    }

    /// Shared orchestrator state, for status queries alongside the sequencer.
    pub fn state(&self) -> &Arc<OrchestratorState> {
        &self.state
    }

    /// Run a check for `user_id` against `task_id`.
    ///
    /// Returns [`CoreError::TaskNotFound`] before any checking is created
    /// when the catalog definitively reports the task missing. Every other
    /// outcome is a [`CheckResult`], partial or full.
    #[instrument(skip(self, source_archive), fields(user_id = %user_id, task_id = %task_id))]
    pub async fn handle(
        &self,
        user_id: &str,
        task_id: &str,
        source_archive: &[u8],
    ) -> Result<CheckResult> {
        match self.catalog.task_exists(task_id).await {
            Ok(false) => {
                return Err(CoreError::TaskNotFound {
                    task_id: task_id.to_string(),
                });
            }
            Ok(true) => {}
            // Unknown, proceed anyway: enrichment is advisory and a flaky
            // catalog must not fail the whole request.
            Err(e) => warn!(error = %e, "Task catalog unavailable, proceeding"),
        }

        let task_name = match self.catalog.task_title(task_id).await {
            Ok(title) => title,
            Err(e) => {
                warn!(error = %e, "Task title lookup failed, using fallback");
                format!("task {}", task_id)
            }
        };
        let pattern_name = match self.catalog.pattern_title(task_id).await {
            Ok(title) => title,
            Err(e) => {
                warn!(error = %e, "Pattern title lookup failed, using fallback");
                task_id.to_string()
            }
        };

        let correlation_id = Uuid::new_v4();
        if let Err(e) = self
            .artifacts
            .store_submission(correlation_id, source_archive)
            .await
        {
            // The compile worker will report the missing archive as a stage
            // failure; the pipeline itself still runs.
            warn!(error = %e, "Failed to store submission archive");
        }

        handlers::handle_start_checking(
            &self.state,
            StartChecking {
                correlation_id,
                user_id: user_id.to_string(),
                task_id: task_id.to_string(),
                task_name,
            },
            &pattern_name,
        )
        .await?;

        let mut result = CheckResult::unattempted(correlation_id);

        // Compile
        let signal = self
            .state
            .bridge
            .wait(correlation_id, Stage::Compile, self.state.deadlines.compile)
            .await;
        match verdict(Stage::Compile, signal) {
            WaitVerdict::Succeeded(message) => {
                result.compiled = true;
                result.compile_msg = message;
            }
            WaitVerdict::Halted(message) => {
                result.compile_msg = message;
                return Ok(result);
            }
        }

        // Verify
        let signal = self
            .state
            .bridge
            .wait(correlation_id, Stage::Verify, self.state.deadlines.verify)
            .await;
        match verdict(Stage::Verify, signal) {
            WaitVerdict::Succeeded(message) => {
                result.tested = true;
                result.test_msg = message;
            }
            WaitVerdict::Halted(message) => {
                result.test_msg = message;
                return Ok(result);
            }
        }

        // Review
        let signal = self
            .state
            .bridge
            .wait(correlation_id, Stage::Review, self.state.deadlines.review)
            .await;
        match verdict(Stage::Review, signal) {
            WaitVerdict::Succeeded(message) => {
                result.reviewed = true;
                result.finished = true;
                result.review_msg = message;
            }
            WaitVerdict::Halted(message) => {
                result.review_msg = message;
                return Ok(result);
            }
        }

        // Best-effort: prefer the persisted review artifact when available.
        match self.artifacts.fetch_review(correlation_id).await {
            Ok(Some(text)) => result.review_msg = text,
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Review artifact fetch failed, keeping event text"),
        }

        info!(%correlation_id, "Check finished");
        Ok(result)
    }
}
