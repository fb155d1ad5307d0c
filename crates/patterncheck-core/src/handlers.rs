// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Orchestration handlers for inbound pipeline messages.
//!
//! One handler per message: worker stage reports, the durable stage
//! deadline, and client cancellation. Each handler serializes on the
//! per-correlation-id lock, loads the checking record, runs the pure state
//! machine, persists the result and then executes the transition's commands
//! (publish the next stage request, arm a fresh deadline, publish the
//! terminal progress summary, resolve the completion bridge).
//!
//! Duplicate, late and out-of-order deliveries fall out as logged no-ops:
//! either the state machine rejects the trigger or the deadline token no
//! longer matches. Unknown correlation ids are dropped the same way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use patterncheck_contracts::{
    CancelChecking, CheckingMessage, CompileRequested, ProgressUpdate, ReviewRequested, Stage,
    StageDeadlineElapsed, StageReport, StartChecking, VerifyRequested,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::bridge::CompletionBridge;
use crate::bus::MessageBus;
use crate::config::StageTimeouts;
use crate::error::{CoreError, Result};
use crate::persistence::{Checking, CheckingStore, StageOutcome};
use crate::state::{self, CheckStatus, Command, Transition, Trigger};
use crate::timeout::TimeoutSupervisor;

/// Shared state for the orchestration handlers.
pub struct OrchestratorState {
    /// Durable checking store.
    pub store: Arc<dyn CheckingStore>,
    /// Message bus for stage requests, deadlines and progress updates.
    pub bus: Arc<dyn MessageBus>,
    /// Completion bridge the sequencer waits on.
    pub bridge: CompletionBridge,
    /// Durable stage deadline supervisor.
    pub timeouts: TimeoutSupervisor,
    /// Per-stage deadlines.
    pub deadlines: StageTimeouts,
    locks: KeyedLocks,
}

impl OrchestratorState {
    /// Create handler state over a store and a bus.
    pub fn new(
        store: Arc<dyn CheckingStore>,
        bus: Arc<dyn MessageBus>,
        deadlines: StageTimeouts,
    ) -> Self {
        Self {
            bridge: CompletionBridge::new(),
            timeouts: TimeoutSupervisor::new(bus.clone()),
            store,
            bus,
            deadlines,
            locks: KeyedLocks::new(),
        }
    }
}

/// Per-correlation-id async locks enforcing single-writer-per-key.
///
/// Entries are evicted opportunistically once nothing holds them, so the
/// table stays proportional to the number of in-flight checkings.
struct KeyedLocks {
    inner: StdMutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn new() -> Self {
        Self {
            inner: StdMutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, correlation_id: Uuid) -> tokio::sync::OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().expect("lock table poisoned");
            map.entry(correlation_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }

    fn evict(&self, correlation_id: &Uuid) {
        let mut map = self.inner.lock().expect("lock table poisoned");
        if let Some(entry) = map.get(correlation_id) {
            // Only the table holds the entry: no guard or waiter outstanding.
            if Arc::strong_count(entry) == 1 {
                map.remove(correlation_id);
            }
        }
    }
}

// ============================================================================
// Start
// ============================================================================

/// Create the checking and enter the compile stage.
///
/// Replaying a correlation id resumes the existing record without publishing
/// anything again. `pattern_name` is the catalog-resolved pattern title,
/// copied onto the record so the auto-advancing review request needs no
/// catalog round-trip.
#[instrument(skip(state, request, pattern_name), fields(correlation_id = %request.correlation_id))]
pub async fn handle_start_checking(
    state: &OrchestratorState,
    request: StartChecking,
    pattern_name: &str,
) -> Result<()> {
    if request.user_id.is_empty() {
        return Err(CoreError::ValidationError {
            field: "user_id".to_string(),
            message: "user_id is required".to_string(),
        });
    }
    if request.task_id.is_empty() {
        return Err(CoreError::ValidationError {
            field: "task_id".to_string(),
            message: "task_id is required".to_string(),
        });
    }

    let correlation_id = request.correlation_id;
    let guard = state.locks.acquire(correlation_id).await;
    let result = async {
        let mut checking = Checking::new(
            correlation_id,
            request.user_id.clone(),
            request.task_id.clone(),
            request.task_name.clone(),
            pattern_name,
            Utc::now(),
        );

        if !state.store.create_if_absent(&checking).await? {
            info!("Correlation id replayed, resuming existing checking");
            return Ok(());
        }

        let armed = state
            .timeouts
            .arm(correlation_id, Stage::Compile, state.deadlines.compile)
            .await?;
        checking.active_timeout = Some(armed);
        state.store.save(&checking).await?;

        state
            .bus
            .publish(CheckingMessage::CompileRequested(CompileRequested {
                correlation_id,
                user_id: checking.user_id.clone(),
                task_id: checking.task_id.clone(),
            }))
            .await?;

        info!(task_id = %checking.task_id, "Checking started, compile requested");
        Ok(())
    }
    .await;
    drop(guard);
    state.locks.evict(&correlation_id);
    result
}

// ============================================================================
// Worker stage reports
// ============================================================================

/// Handle a successful compiler report.
#[instrument(skip(state, report), fields(correlation_id = %report.correlation_id))]
pub async fn handle_compilation_finished(
    state: &OrchestratorState,
    report: StageReport,
) -> Result<()> {
    apply_trigger(
        state,
        report.correlation_id,
        Trigger::CodeCompiled {
            message: report.result_text,
        },
    )
    .await
}

/// Handle a failed compiler report.
#[instrument(skip(state, report), fields(correlation_id = %report.correlation_id))]
pub async fn handle_compilation_failed(
    state: &OrchestratorState,
    report: StageReport,
) -> Result<()> {
    apply_trigger(
        state,
        report.correlation_id,
        Trigger::CompilationFailed {
            message: report.result_text,
        },
    )
    .await
}

/// Handle a successful verification report.
#[instrument(skip(state, report), fields(correlation_id = %report.correlation_id))]
pub async fn handle_verification_finished(
    state: &OrchestratorState,
    report: StageReport,
) -> Result<()> {
    apply_trigger(
        state,
        report.correlation_id,
        Trigger::TestsFinished {
            message: report.result_text,
        },
    )
    .await
}

/// Handle a failed verification report.
#[instrument(skip(state, report), fields(correlation_id = %report.correlation_id))]
pub async fn handle_verification_failed(
    state: &OrchestratorState,
    report: StageReport,
) -> Result<()> {
    apply_trigger(
        state,
        report.correlation_id,
        Trigger::TestsFailed {
            message: report.result_text,
        },
    )
    .await
}

/// Handle a successful review report.
#[instrument(skip(state, report), fields(correlation_id = %report.correlation_id))]
pub async fn handle_review_finished(state: &OrchestratorState, report: StageReport) -> Result<()> {
    apply_trigger(
        state,
        report.correlation_id,
        Trigger::ReviewFinished {
            message: report.result_text,
        },
    )
    .await
}

/// Handle a failed review report.
#[instrument(skip(state, report), fields(correlation_id = %report.correlation_id))]
pub async fn handle_review_failed(state: &OrchestratorState, report: StageReport) -> Result<()> {
    apply_trigger(
        state,
        report.correlation_id,
        Trigger::ReviewFailed {
            message: report.result_text,
        },
    )
    .await
}

// ============================================================================
// Deadlines and cancellation
// ============================================================================

/// Handle a fired stage deadline.
///
/// The token is checked against the record under the per-key lock: a real
/// stage outcome processed first cleared or replaced it, making this firing
/// a no-op. Otherwise the deadline wins and the stage fails by timeout.
#[instrument(skip(state, deadline), fields(correlation_id = %deadline.correlation_id, stage = %deadline.stage))]
pub async fn handle_stage_deadline(
    state: &OrchestratorState,
    deadline: StageDeadlineElapsed,
) -> Result<()> {
    let correlation_id = deadline.correlation_id;
    let guard = state.locks.acquire(correlation_id).await;
    let result = async {
        let Some(checking) = state.store.load(correlation_id).await? else {
            debug!("Deadline for unknown checking ignored");
            return Ok(());
        };
        if !TimeoutSupervisor::is_live(&checking, deadline.stage, deadline.token) {
            debug!("Stale stage deadline ignored");
            return Ok(());
        }
        warn!("Stage deadline elapsed without a worker response");
        advance_and_execute(
            state,
            checking,
            Trigger::StageTimedOut {
                stage: deadline.stage,
            },
        )
        .await
    }
    .await;
    drop(guard);
    state.locks.evict(&correlation_id);
    result
}

/// Handle client cancellation.
#[instrument(skip(state, cancel), fields(correlation_id = %cancel.correlation_id))]
pub async fn handle_cancel(state: &OrchestratorState, cancel: CancelChecking) -> Result<()> {
    apply_trigger(state, cancel.correlation_id, Trigger::Cancel).await
}

// ============================================================================
// Dispatch
// ============================================================================

/// Route an inbound bus message to its handler.
///
/// Stage requests and progress updates are consumed by the worker services
/// and the progress tracker, not by the orchestrator; they are dropped here.
pub async fn dispatch(state: &OrchestratorState, message: CheckingMessage) -> Result<()> {
    match message {
        CheckingMessage::StartChecking(request) => {
            // Bus-driven starts have no catalog in reach; the task id stands
            // in for the pattern title (enrichment is advisory).
            let pattern_name = request.task_id.clone();
            handle_start_checking(state, request, &pattern_name).await
        }
        CheckingMessage::CompilationFinished(report) => {
            handle_compilation_finished(state, report).await
        }
        CheckingMessage::CompilationFailed(report) => {
            handle_compilation_failed(state, report).await
        }
        CheckingMessage::VerificationFinished(report) => {
            handle_verification_finished(state, report).await
        }
        CheckingMessage::VerificationFailed(report) => {
            handle_verification_failed(state, report).await
        }
        CheckingMessage::ReviewFinished(report) => handle_review_finished(state, report).await,
        CheckingMessage::ReviewFailed(report) => handle_review_failed(state, report).await,
        CheckingMessage::StageDeadlineElapsed(deadline) => {
            handle_stage_deadline(state, deadline).await
        }
        CheckingMessage::CancelChecking(cancel) => handle_cancel(state, cancel).await,
        CheckingMessage::CompileRequested(_)
        | CheckingMessage::VerifyRequested(_)
        | CheckingMessage::ReviewRequested(_)
        | CheckingMessage::ProgressUpdate(_) => {
            debug!(kind = message.kind(), "Outbound message kind, not ours to handle");
            Ok(())
        }
    }
}

// ============================================================================
// Transition execution
// ============================================================================

async fn apply_trigger(
    state: &OrchestratorState,
    correlation_id: Uuid,
    trigger: Trigger,
) -> Result<()> {
    let guard = state.locks.acquire(correlation_id).await;
    let result = async {
        let Some(checking) = state.store.load(correlation_id).await? else {
            warn!(%correlation_id, "Event for unknown checking ignored");
            return Ok(());
        };
        advance_and_execute(state, checking, trigger).await
    }
    .await;
    drop(guard);
    state.locks.evict(&correlation_id);
    result
}

/// Run the state machine and execute the resulting commands.
///
/// Timeout arm/disarm mutate the record and are folded in before the single
/// save; publishes and the bridge resolve happen after, so a crash in
/// between leaves at worst a stale deadline token and an unresolved waiter -
/// both safe.
async fn advance_and_execute(
    state: &OrchestratorState,
    current: Checking,
    trigger: Trigger,
) -> Result<()> {
    let correlation_id = current.correlation_id;
    let Some(Transition {
        mut checking,
        commands,
    }) = state::advance(&current, &trigger, Utc::now())
    else {
        debug!(
            %correlation_id,
            status = %current.status,
            ?trigger,
            "Trigger ignored in current state"
        );
        return Ok(());
    };

    for command in &commands {
        match command {
            Command::ArmTimeout(stage) => {
                let armed = state
                    .timeouts
                    .arm(correlation_id, *stage, state.deadlines.for_stage(*stage))
                    .await?;
                checking.active_timeout = Some(armed);
            }
            Command::DisarmTimeout(stage) => {
                if checking
                    .active_timeout
                    .as_ref()
                    .is_some_and(|armed| armed.stage == *stage)
                {
                    checking.active_timeout = None;
                }
            }
            _ => {}
        }
    }

    state.store.save(&checking).await?;
    info!(%correlation_id, status = %checking.status, "Checking advanced");

    for command in commands {
        match command {
            Command::RequestStage(stage) => publish_stage_request(state, &checking, stage).await?,
            Command::PublishProgress => {
                state
                    .bus
                    .publish(CheckingMessage::ProgressUpdate(progress_update(&checking)))
                    .await?;
            }
            Command::NotifyWaiter(stage, signal) => {
                state.bridge.resolve(correlation_id, stage, signal)
            }
            Command::ArmTimeout(_) | Command::DisarmTimeout(_) => {}
        }
    }
    Ok(())
}

async fn publish_stage_request(
    state: &OrchestratorState,
    checking: &Checking,
    stage: Stage,
) -> Result<()> {
    let message = match stage {
        Stage::Compile => CheckingMessage::CompileRequested(CompileRequested {
            correlation_id: checking.correlation_id,
            user_id: checking.user_id.clone(),
            task_id: checking.task_id.clone(),
        }),
        Stage::Verify => CheckingMessage::VerifyRequested(VerifyRequested {
            correlation_id: checking.correlation_id,
            user_id: checking.user_id.clone(),
            task_id: checking.task_id.clone(),
        }),
        Stage::Review => CheckingMessage::ReviewRequested(ReviewRequested {
            correlation_id: checking.correlation_id,
            user_id: checking.user_id.clone(),
            task_id: checking.task_id.clone(),
            pattern_name: checking.pattern_name.clone(),
        }),
    };
    state.bus.publish(message).await
}

fn progress_update(checking: &Checking) -> ProgressUpdate {
    fn flag(outcome: &Option<StageOutcome>) -> bool {
        outcome.as_ref().is_some_and(|o| o.success)
    }
    fn msg(outcome: &Option<StageOutcome>) -> String {
        outcome.as_ref().map(|o| o.message.clone()).unwrap_or_default()
    }

    let passed = checking.status == CheckStatus::Passed;
    ProgressUpdate {
        user_id: checking.user_id.clone(),
        task_id: checking.task_id.clone(),
        task_name: checking.task_name.clone(),
        compiled: flag(&checking.compiled),
        tested: flag(&checking.tested),
        reviewed: flag(&checking.reviewed),
        finished: passed,
        overall_result: passed,
        correlation_id: checking.correlation_id,
        compile_msg: msg(&checking.compiled),
        test_msg: msg(&checking.tested),
        review_msg: msg(&checking.reviewed),
        published_at: Utc::now(),
    }
}
