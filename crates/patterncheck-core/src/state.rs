// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Checking state machine.
//!
//! The transition function is pure: it takes the current record and a
//! trigger and returns the next record plus the side-effecting commands the
//! caller must execute (publish a stage request, arm or disarm a deadline,
//! publish progress, wake the waiting sequencer). No I/O happens here, which
//! is what makes the transition table testable without a bus or a store.
//!
//! ```text
//!  Compiling ──code-compiled──► Testing ──tests-finished──► Reviewing
//!      │                           │                            │
//!      │ failed/timeout/cancel     │ failed/timeout/cancel      │ review-finished
//!      ▼                           ▼                            ▼
//!   Failed/Canceled            Failed/Canceled               Passed
//!                                                   (failed/timeout/cancel
//!                                                    ──► Failed/Canceled)
//! ```
//!
//! The intermediate Compiled/Tested/Reviewed states auto-advance: a
//! successful stage report moves straight into the next active state (or
//! Passed) within one transition, so nothing can ever be left lingering in
//! an intermediate state waiting for an external nudge. Terminal states are
//! absorbing: every trigger against them is a no-op, which is what makes
//! duplicate and late deliveries safe to drop.

use chrono::{DateTime, Utc};
use patterncheck_contracts::Stage;

use crate::bridge::StageSignal;
use crate::persistence::{Checking, StageOutcome};

/// Pipeline status of a checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckStatus {
    /// Waiting for the compiler worker.
    Compiling,
    /// Compilation succeeded; transient, auto-advances to Testing.
    Compiled,
    /// Waiting for the verification worker.
    Testing,
    /// Verification succeeded; transient, auto-advances to Reviewing.
    Tested,
    /// Waiting for the review worker.
    Reviewing,
    /// Review succeeded; transient, auto-advances to Passed.
    Reviewed,
    /// Cancelled by the client. Terminal.
    Canceled,
    /// A stage failed or timed out. Terminal.
    Failed,
    /// Every stage succeeded. Terminal.
    Passed,
}

impl CheckStatus {
    /// Whether this status absorbs all further triggers.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckStatus::Canceled | CheckStatus::Failed | CheckStatus::Passed)
    }

    /// The stage an active status is waiting on.
    pub fn active_stage(&self) -> Option<Stage> {
        match self {
            CheckStatus::Compiling => Some(Stage::Compile),
            CheckStatus::Testing => Some(Stage::Verify),
            CheckStatus::Reviewing => Some(Stage::Review),
            _ => None,
        }
    }

    /// Stable string form, used in persisted records and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Compiling => "compiling",
            CheckStatus::Compiled => "compiled",
            CheckStatus::Testing => "testing",
            CheckStatus::Tested => "tested",
            CheckStatus::Reviewing => "reviewing",
            CheckStatus::Reviewed => "reviewed",
            CheckStatus::Canceled => "canceled",
            CheckStatus::Failed => "failed",
            CheckStatus::Passed => "passed",
        }
    }

    /// Parse the stable string form produced by [`CheckStatus::as_str`].
    pub fn parse(s: &str) -> Option<CheckStatus> {
        match s {
            "compiling" => Some(CheckStatus::Compiling),
            "compiled" => Some(CheckStatus::Compiled),
            "testing" => Some(CheckStatus::Testing),
            "tested" => Some(CheckStatus::Tested),
            "reviewing" => Some(CheckStatus::Reviewing),
            "reviewed" => Some(CheckStatus::Reviewed),
            "canceled" => Some(CheckStatus::Canceled),
            "failed" => Some(CheckStatus::Failed),
            "passed" => Some(CheckStatus::Passed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event driving a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Compiler reported success.
    CodeCompiled {
        /// Compiler output.
        message: String,
    },
    /// Compiler reported failure.
    CompilationFailed {
        /// Compiler output.
        message: String,
    },
    /// Verification worker reported success.
    TestsFinished {
        /// Verification report.
        message: String,
    },
    /// Verification worker reported failure.
    TestsFailed {
        /// Verification report.
        message: String,
    },
    /// Review worker reported success.
    ReviewFinished {
        /// Review text.
        message: String,
    },
    /// Review worker reported failure.
    ReviewFailed {
        /// Review text.
        message: String,
    },
    /// The armed deadline for a stage fired before any worker response.
    StageTimedOut {
        /// Stage whose deadline fired.
        stage: Stage,
    },
    /// Client cancelled the checking.
    Cancel,
}

/// Side effect the caller must execute after persisting the transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Publish the request event for the given stage.
    RequestStage(Stage),
    /// Arm the durable deadline for the given stage.
    ArmTimeout(Stage),
    /// Invalidate the live deadline token for the given stage.
    DisarmTimeout(Stage),
    /// Publish the terminal progress summary.
    PublishProgress,
    /// Resolve the completion bridge entry for the given stage.
    NotifyWaiter(Stage, StageSignal),
}

/// Result of a legal transition: the next record plus its commands.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The record after the transition.
    pub checking: Checking,
    /// Commands to execute, in order, after the record is persisted.
    pub commands: Vec<Command>,
}

/// Message recorded for a stage that hit its deadline.
pub fn timeout_message(stage: Stage) -> String {
    format!("{} stage timed out", stage)
}

/// Apply `trigger` to `checking`.
///
/// Returns `None` when the trigger is not legal in the current state -
/// duplicate, late, or out-of-order deliveries are dropped, never raised as
/// errors. Terminal states absorb everything.
pub fn advance(checking: &Checking, trigger: &Trigger, now: DateTime<Utc>) -> Option<Transition> {
    if checking.status.is_terminal() {
        return None;
    }

    match (checking.status, trigger) {
        (CheckStatus::Compiling, Trigger::CodeCompiled { message }) => Some(stage_succeeded(
            checking,
            Stage::Compile,
            CheckStatus::Testing,
            message.clone(),
        )),
        (CheckStatus::Compiling, Trigger::CompilationFailed { message }) => Some(stage_failed(
            checking,
            Stage::Compile,
            message.clone(),
            StageSignal::Completed {
                success: false,
                message: message.clone(),
            },
            now,
        )),
        (CheckStatus::Testing, Trigger::TestsFinished { message }) => Some(stage_succeeded(
            checking,
            Stage::Verify,
            CheckStatus::Reviewing,
            message.clone(),
        )),
        (CheckStatus::Testing, Trigger::TestsFailed { message }) => Some(stage_failed(
            checking,
            Stage::Verify,
            message.clone(),
            StageSignal::Completed {
                success: false,
                message: message.clone(),
            },
            now,
        )),
        (CheckStatus::Reviewing, Trigger::ReviewFinished { message }) => {
            let mut next = checking.clone();
            record_outcome(&mut next, Stage::Review, true, message.clone());
            next.status = CheckStatus::Passed;
            next.completed_at = next.completed_at.or(Some(now));
            Some(Transition {
                checking: next,
                commands: vec![
                    Command::DisarmTimeout(Stage::Review),
                    Command::PublishProgress,
                    Command::NotifyWaiter(
                        Stage::Review,
                        StageSignal::Completed {
                            success: true,
                            message: message.clone(),
                        },
                    ),
                ],
            })
        }
        (CheckStatus::Reviewing, Trigger::ReviewFailed { message }) => Some(stage_failed(
            checking,
            Stage::Review,
            message.clone(),
            StageSignal::Completed {
                success: false,
                message: message.clone(),
            },
            now,
        )),
        (_, Trigger::StageTimedOut { stage }) => {
            // Only the active stage's deadline is meaningful.
            if checking.status.active_stage() != Some(*stage) {
                return None;
            }
            Some(stage_failed(
                checking,
                *stage,
                timeout_message(*stage),
                StageSignal::DeadlineElapsed,
                now,
            ))
        }
        (_, Trigger::Cancel) => {
            let active = checking.status.active_stage()?;
            let mut next = checking.clone();
            next.status = CheckStatus::Canceled;
            next.completed_at = next.completed_at.or(Some(now));
            Some(Transition {
                checking: next,
                commands: vec![
                    Command::DisarmTimeout(active),
                    Command::PublishProgress,
                    Command::NotifyWaiter(active, StageSignal::Canceled),
                ],
            })
        }
        _ => None,
    }
}

/// Successful stage report: record the outcome, pass through the transient
/// intermediate state into the next active one, request the next stage.
fn stage_succeeded(
    checking: &Checking,
    stage: Stage,
    next_status: CheckStatus,
    message: String,
) -> Transition {
    let next_stage = match next_status.active_stage() {
        Some(next_stage) => next_stage,
        // Only active states follow a successful non-final stage.
        None => unreachable!("successful stage must advance into an active state"),
    };
    let mut next = checking.clone();
    record_outcome(&mut next, stage, true, message.clone());
    next.status = next_status;
    Transition {
        checking: next,
        commands: vec![
            Command::DisarmTimeout(stage),
            Command::RequestStage(next_stage),
            Command::ArmTimeout(next_stage),
            Command::NotifyWaiter(stage, StageSignal::Completed {
                success: true,
                message,
            }),
        ],
    }
}

fn stage_failed(
    checking: &Checking,
    stage: Stage,
    message: String,
    signal: StageSignal,
    now: DateTime<Utc>,
) -> Transition {
    let mut next = checking.clone();
    record_outcome(&mut next, stage, false, message);
    next.status = CheckStatus::Failed;
    next.completed_at = next.completed_at.or(Some(now));
    Transition {
        checking: next,
        commands: vec![
            Command::DisarmTimeout(stage),
            Command::PublishProgress,
            Command::NotifyWaiter(stage, signal),
        ],
    }
}

/// Record a stage outcome. Outcomes are monotonic: only the stage that is
/// currently resolving writes, and earlier stages are never touched.
fn record_outcome(checking: &mut Checking, stage: Stage, success: bool, message: String) {
    let outcome = Some(StageOutcome { success, message });
    match stage {
        Stage::Compile => checking.compiled = outcome,
        Stage::Verify => checking.tested = outcome,
        Stage::Review => checking.reviewed = outcome,
    }
}
