// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message contracts for the patterncheck submission pipeline.
//!
//! Every event exchanged between the checking orchestrator and the worker
//! services (compiler, verifier, reviewer, progress tracker) is defined here.
//! All events for one submission check carry the same `correlation_id`, the
//! key tying the pipeline together.
//!
//! # Pipeline events
//!
//! ```text
//! StartChecking ──► CompileRequested ──► CompilationFinished/Failed
//!                   VerifyRequested  ──► VerificationFinished/Failed
//!                   ReviewRequested  ──► ReviewFinished/Failed
//!                                        │
//!                   CancelChecking ──────┤  (any stage)
//!                   StageDeadlineElapsed ┘  (scheduled, per stage)
//!                                        │
//!                                        ▼
//!                                  ProgressUpdate
//! ```
//!
//! Delivery is at-least-once: consumers must tolerate duplicates and
//! out-of-order arrival. Contracts are plain serde structs so any transport
//! that can move JSON (or an equivalent encoding) satisfies them.

#![deny(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One phase of the checking pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Compilation of the submitted sources.
    Compile,
    /// Reflection-based structural verification.
    Verify,
    /// AI-assisted design review.
    Review,
}

impl Stage {
    /// Stable string form, used in logs and persisted records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Compile => "compile",
            Stage::Verify => "verify",
            Stage::Review => "review",
        }
    }

    /// Parse the stable string form produced by [`Stage::as_str`].
    pub fn parse(s: &str) -> Option<Stage> {
        match s {
            "compile" => Some(Stage::Compile),
            "verify" => Some(Stage::Verify),
            "review" => Some(Stage::Review),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to start checking a submission against a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartChecking {
    /// Correlation id generated once per check request.
    pub correlation_id: Uuid,
    /// Submitting user.
    pub user_id: String,
    /// Target task in the catalog.
    pub task_id: String,
    /// Human-readable task title, resolved from the catalog at request time.
    pub task_name: String,
}

/// Request for the compiler worker to build the submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileRequested {
    /// Correlation id of the checking.
    pub correlation_id: Uuid,
    /// Submitting user.
    pub user_id: String,
    /// Target task.
    pub task_id: String,
}

/// Request for the verification worker to run the structural checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyRequested {
    /// Correlation id of the checking.
    pub correlation_id: Uuid,
    /// Submitting user.
    pub user_id: String,
    /// Target task.
    pub task_id: String,
}

/// Request for the review worker to produce a design review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequested {
    /// Correlation id of the checking.
    pub correlation_id: Uuid,
    /// Submitting user.
    pub user_id: String,
    /// Target task.
    pub task_id: String,
    /// Title of the design pattern the task teaches.
    pub pattern_name: String,
}

/// Outcome reported by a stage worker.
///
/// The same shape is used for every stage and both polarities; the envelope
/// variant carries the stage and success flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    /// Correlation id of the checking.
    pub correlation_id: Uuid,
    /// Submitting user.
    pub user_id: String,
    /// Target task.
    pub task_id: String,
    /// Free-text worker output: compiler log excerpt, verification report,
    /// or review explanation.
    pub result_text: String,
}

/// Scheduled deadline signal for the currently active stage.
///
/// Published with a visibility delay when a stage is armed. The `token` is
/// persisted on the checking record; a deadline whose token no longer matches
/// was disarmed by a real stage outcome and must be ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDeadlineElapsed {
    /// Correlation id of the checking.
    pub correlation_id: Uuid,
    /// Stage the deadline was armed for.
    pub stage: Stage,
    /// Timeout token issued when the deadline was armed.
    pub token: Uuid,
}

/// Client-initiated cancellation of a checking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelChecking {
    /// Correlation id of the checking to cancel.
    pub correlation_id: Uuid,
}

/// Summary published to the progress-tracking collaborator after every
/// terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Submitting user.
    pub user_id: String,
    /// Target task.
    pub task_id: String,
    /// Human-readable task title.
    pub task_name: String,
    /// Whether compilation succeeded.
    pub compiled: bool,
    /// Whether structural verification succeeded.
    pub tested: bool,
    /// Whether the review succeeded.
    pub reviewed: bool,
    /// Whether the full pipeline ran to completion.
    pub finished: bool,
    /// Whether the submission passed overall.
    pub overall_result: bool,
    /// Correlation id of the checking.
    pub correlation_id: Uuid,
    /// Compiler output excerpt, empty if the stage was not attempted.
    pub compile_msg: String,
    /// Verification report, empty if the stage was not attempted.
    pub test_msg: String,
    /// Review explanation, empty if the stage was not attempted.
    pub review_msg: String,
    /// When the update was published.
    pub published_at: DateTime<Utc>,
}

/// Transport envelope routing every pipeline message over one bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckingMessage {
    /// Start a submission check.
    StartChecking(StartChecking),
    /// Compile the submission.
    CompileRequested(CompileRequested),
    /// Compiler finished successfully.
    CompilationFinished(StageReport),
    /// Compiler reported failure.
    CompilationFailed(StageReport),
    /// Run structural verification.
    VerifyRequested(VerifyRequested),
    /// Verification finished successfully.
    VerificationFinished(StageReport),
    /// Verification reported failure.
    VerificationFailed(StageReport),
    /// Produce the design review.
    ReviewRequested(ReviewRequested),
    /// Review finished successfully.
    ReviewFinished(StageReport),
    /// Review reported failure.
    ReviewFailed(StageReport),
    /// Scheduled stage deadline fired.
    StageDeadlineElapsed(StageDeadlineElapsed),
    /// Client cancelled the checking.
    CancelChecking(CancelChecking),
    /// Terminal progress summary.
    ProgressUpdate(ProgressUpdate),
}

impl CheckingMessage {
    /// Correlation id carried by this message.
    pub fn correlation_id(&self) -> Uuid {
        match self {
            CheckingMessage::StartChecking(m) => m.correlation_id,
            CheckingMessage::CompileRequested(m) => m.correlation_id,
            CheckingMessage::CompilationFinished(m) => m.correlation_id,
            CheckingMessage::CompilationFailed(m) => m.correlation_id,
            CheckingMessage::VerifyRequested(m) => m.correlation_id,
            CheckingMessage::VerificationFinished(m) => m.correlation_id,
            CheckingMessage::VerificationFailed(m) => m.correlation_id,
            CheckingMessage::ReviewRequested(m) => m.correlation_id,
            CheckingMessage::ReviewFinished(m) => m.correlation_id,
            CheckingMessage::ReviewFailed(m) => m.correlation_id,
            CheckingMessage::StageDeadlineElapsed(m) => m.correlation_id,
            CheckingMessage::CancelChecking(m) => m.correlation_id,
            CheckingMessage::ProgressUpdate(m) => m.correlation_id,
        }
    }

    /// Short message name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckingMessage::StartChecking(_) => "start_checking",
            CheckingMessage::CompileRequested(_) => "compile_requested",
            CheckingMessage::CompilationFinished(_) => "compilation_finished",
            CheckingMessage::CompilationFailed(_) => "compilation_failed",
            CheckingMessage::VerifyRequested(_) => "verify_requested",
            CheckingMessage::VerificationFinished(_) => "verification_finished",
            CheckingMessage::VerificationFailed(_) => "verification_failed",
            CheckingMessage::ReviewRequested(_) => "review_requested",
            CheckingMessage::ReviewFinished(_) => "review_finished",
            CheckingMessage::ReviewFailed(_) => "review_failed",
            CheckingMessage::StageDeadlineElapsed(_) => "stage_deadline_elapsed",
            CheckingMessage::CancelChecking(_) => "cancel_checking",
            CheckingMessage::ProgressUpdate(_) => "progress_update",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_round_trip() {
        for stage in [Stage::Compile, Stage::Verify, Stage::Review] {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("link"), None);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Compile.to_string(), "compile");
        assert_eq!(Stage::Verify.to_string(), "verify");
        assert_eq!(Stage::Review.to_string(), "review");
    }

    #[test]
    fn test_envelope_serde_round_trip() {
        let correlation_id = Uuid::new_v4();
        let msg = CheckingMessage::CompilationFinished(StageReport {
            correlation_id,
            user_id: "user-1".to_string(),
            task_id: "singleton".to_string(),
            result_text: "build ok".to_string(),
        });

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"kind\":\"compilation_finished\""));

        let back: CheckingMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.correlation_id(), correlation_id);
    }

    #[test]
    fn test_deadline_carries_token() {
        let msg = CheckingMessage::StageDeadlineElapsed(StageDeadlineElapsed {
            correlation_id: Uuid::new_v4(),
            stage: Stage::Review,
            token: Uuid::new_v4(),
        });

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"stage\":\"review\""));
        assert_eq!(msg.kind(), "stage_deadline_elapsed");
    }

    #[test]
    fn test_envelope_kind_matches_tag() {
        let msg = CheckingMessage::CancelChecking(CancelChecking {
            correlation_id: Uuid::new_v4(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(&format!("\"kind\":\"{}\"", msg.kind())));
    }
}
