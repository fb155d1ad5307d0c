// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared harness for pipeline integration tests.
//!
//! Wires the in-memory bus, the orchestration handlers and scripted stage
//! workers into one consumer loop, so a test describes the pipeline as
//! "compile succeeds, verification stays silent" and drives the sequencer
//! against it. Every message crossing the bus is captured in a log the
//! tests can poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use patterncheck_contracts::{CheckingMessage, ProgressUpdate, StageReport};
use patterncheck_core::bus::{InMemoryBus, MessageBus};
use patterncheck_core::config::StageTimeouts;
use patterncheck_core::error::{CoreError, Result};
use patterncheck_core::handlers::{self, OrchestratorState};
use patterncheck_core::persistence::MemoryStore;
use patterncheck_core::sequencer::{CheckSequencer, ReviewArtifacts, TaskCatalog};

/// Scripted behavior of one stage worker.
#[derive(Debug, Clone, Copy)]
pub enum WorkerBehavior {
    /// Respond with a finished report carrying this text.
    Succeed(&'static str),
    /// Respond with a failed report carrying this text.
    Fail(&'static str),
    /// Never respond; the stage deadline decides.
    Silent,
}

/// Worker script for the three pipeline stages.
#[derive(Debug, Clone, Copy)]
pub struct StagePlan {
    pub compile: WorkerBehavior,
    pub verify: WorkerBehavior,
    pub review: WorkerBehavior,
}

impl StagePlan {
    pub fn all_succeed() -> Self {
        Self {
            compile: WorkerBehavior::Succeed("build ok"),
            verify: WorkerBehavior::Succeed("all checks passed"),
            review: WorkerBehavior::Succeed("clean pattern structure"),
        }
    }
}

/// Catalog stub with fixed answers.
pub struct StaticCatalog {
    pub exists: bool,
    pub task_title: &'static str,
    pub pattern_title: &'static str,
    /// When set, every lookup fails (transient catalog outage).
    pub unavailable: bool,
}

impl StaticCatalog {
    pub fn with_task(task_title: &'static str, pattern_title: &'static str) -> Self {
        Self {
            exists: true,
            task_title,
            pattern_title,
            unavailable: false,
        }
    }
}

#[async_trait]
impl TaskCatalog for StaticCatalog {
    async fn task_exists(&self, _task_id: &str) -> Result<bool> {
        if self.unavailable {
            return Err(CoreError::CatalogUnavailable {
                details: "stubbed outage".to_string(),
            });
        }
        Ok(self.exists)
    }

    async fn task_title(&self, _task_id: &str) -> Result<String> {
        if self.unavailable {
            return Err(CoreError::CatalogUnavailable {
                details: "stubbed outage".to_string(),
            });
        }
        Ok(self.task_title.to_string())
    }

    async fn pattern_title(&self, _task_id: &str) -> Result<String> {
        if self.unavailable {
            return Err(CoreError::CatalogUnavailable {
                details: "stubbed outage".to_string(),
            });
        }
        Ok(self.pattern_title.to_string())
    }
}

/// Artifact storage stub keeping everything in a map.
#[derive(Default)]
pub struct MemoryArtifacts {
    pub submissions: Mutex<HashMap<Uuid, Vec<u8>>>,
    pub review_text: Option<&'static str>,
}

#[async_trait]
impl ReviewArtifacts for MemoryArtifacts {
    async fn store_submission(&self, correlation_id: Uuid, archive: &[u8]) -> Result<()> {
        self.submissions
            .lock()
            .await
            .insert(correlation_id, archive.to_vec());
        Ok(())
    }

    async fn fetch_review(&self, _correlation_id: Uuid) -> Result<Option<String>> {
        Ok(self.review_text.map(str::to_string))
    }
}

/// Running pipeline harness: orchestrator plus scripted workers on one bus.
pub struct Harness {
    pub state: Arc<OrchestratorState>,
    pub bus: Arc<InMemoryBus>,
    pub sequencer: Arc<CheckSequencer>,
    pub artifacts: Arc<MemoryArtifacts>,
    pub log: Arc<Mutex<Vec<CheckingMessage>>>,
}

impl Harness {
    pub fn start(plan: StagePlan, timeouts: StageTimeouts) -> Self {
        Self::start_with(
            plan,
            timeouts,
            StaticCatalog::with_task("Singleton", "Singleton"),
            MemoryArtifacts::default(),
        )
    }

    pub fn start_with(
        plan: StagePlan,
        timeouts: StageTimeouts,
        catalog: StaticCatalog,
        artifacts: MemoryArtifacts,
    ) -> Self {
        let (bus, mut rx) = InMemoryBus::channel();
        let state = Arc::new(OrchestratorState::new(
            Arc::new(MemoryStore::new()),
            bus.clone(),
            timeouts,
        ));
        let artifacts = Arc::new(artifacts);
        let sequencer = Arc::new(CheckSequencer::new(
            state.clone(),
            Arc::new(catalog),
            artifacts.clone(),
        ));
        let log: Arc<Mutex<Vec<CheckingMessage>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let state = state.clone();
            let bus = bus.clone();
            let log = log.clone();
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    log.lock().await.push(message.clone());

                    if let Some(response) = worker_response(&plan, &message) {
                        bus.publish(response).await.expect("worker publish");
                    }

                    if let Err(e) = handlers::dispatch(&state, message).await {
                        eprintln!("dispatch error: {e}");
                    }
                }
            });
        }

        Self {
            state,
            bus,
            sequencer,
            artifacts,
            log,
        }
    }

    /// Snapshot of every message seen on the bus so far.
    pub async fn published(&self) -> Vec<CheckingMessage> {
        self.log.lock().await.clone()
    }

    /// All progress updates published so far.
    pub async fn progress_updates(&self) -> Vec<ProgressUpdate> {
        self.log
            .lock()
            .await
            .iter()
            .filter_map(|message| match message {
                CheckingMessage::ProgressUpdate(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }

    /// Poll the log until a message matches, panicking after two seconds.
    pub async fn wait_for(
        &self,
        what: &str,
        predicate: impl Fn(&CheckingMessage) -> bool,
    ) -> CheckingMessage {
        let deadline = Duration::from_secs(2);
        tokio::time::timeout(deadline, async {
            loop {
                if let Some(found) = self
                    .log
                    .lock()
                    .await
                    .iter()
                    .find(|message| predicate(message))
                {
                    return found.clone();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    }
}

/// Short stage deadlines so a silent worker fails fast in tests.
pub fn fast_timeouts() -> StageTimeouts {
    StageTimeouts {
        compile: Duration::from_millis(200),
        verify: Duration::from_millis(200),
        review: Duration::from_millis(200),
    }
}

fn worker_response(plan: &StagePlan, message: &CheckingMessage) -> Option<CheckingMessage> {
    let (behavior, correlation_id, user_id, task_id) = match message {
        CheckingMessage::CompileRequested(request) => (
            plan.compile,
            request.correlation_id,
            request.user_id.clone(),
            request.task_id.clone(),
        ),
        CheckingMessage::VerifyRequested(request) => (
            plan.verify,
            request.correlation_id,
            request.user_id.clone(),
            request.task_id.clone(),
        ),
        CheckingMessage::ReviewRequested(request) => (
            plan.review,
            request.correlation_id,
            request.user_id.clone(),
            request.task_id.clone(),
        ),
        _ => return None,
    };

    let report = |text: &'static str| StageReport {
        correlation_id,
        user_id,
        task_id,
        result_text: text.to_string(),
    };

    match (message, behavior) {
        (_, WorkerBehavior::Silent) => None,
        (CheckingMessage::CompileRequested(_), WorkerBehavior::Succeed(text)) => {
            Some(CheckingMessage::CompilationFinished(report(text)))
        }
        (CheckingMessage::CompileRequested(_), WorkerBehavior::Fail(text)) => {
            Some(CheckingMessage::CompilationFailed(report(text)))
        }
        (CheckingMessage::VerifyRequested(_), WorkerBehavior::Succeed(text)) => {
            Some(CheckingMessage::VerificationFinished(report(text)))
        }
        (CheckingMessage::VerifyRequested(_), WorkerBehavior::Fail(text)) => {
            Some(CheckingMessage::VerificationFailed(report(text)))
        }
        (CheckingMessage::ReviewRequested(_), WorkerBehavior::Succeed(text)) => {
            Some(CheckingMessage::ReviewFinished(report(text)))
        }
        (CheckingMessage::ReviewRequested(_), WorkerBehavior::Fail(text)) => {
            Some(CheckingMessage::ReviewFailed(report(text)))
        }
        _ => None,
    }
}
