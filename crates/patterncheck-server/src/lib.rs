// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Patterncheck HTTP API server.
//!
//! The synchronous face of the asynchronous checking pipeline:
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /check` | Run a check, return the partial or full result |
//! | `GET /check/{correlation_id}` | Snapshot of a checking record |
//! | `POST /check/{correlation_id}/cancel` | Publish a cancel for a checking |
//! | `GET /health` | Liveness and store reachability |
//!
//! Pipeline stage failure is business data: `POST /check` answers 200 with
//! a partial result, never 5xx. Only an unknown task is 404, before any
//! checking is created.

#![deny(missing_docs)]

/// HTTP clients for the task catalog and artifact storage collaborators.
pub mod clients;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use patterncheck_contracts::{CancelChecking, CheckingMessage};
use patterncheck_core::bus::MessageBus;
use patterncheck_core::error::CoreError;
use patterncheck_core::handlers::OrchestratorState;
use patterncheck_core::persistence::{Checking, StageOutcome};
use patterncheck_core::sequencer::CheckSequencer;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Sequencer driving the synchronous check flow.
    pub sequencer: Arc<CheckSequencer>,
    /// Orchestrator state, for status queries and health checks.
    pub orchestrator: Arc<OrchestratorState>,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/check", post(check))
        .route("/check/{correlation_id}", get(check_status))
        .route("/check/{correlation_id}/cancel", post(cancel))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Request body for `POST /check`.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// Target task id.
    pub task_id: String,
    /// Base64-encoded source archive.
    pub source_archive: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

fn error_response(status: StatusCode, error: &CoreError) -> Response {
    (
        status,
        Json(ErrorBody {
            code: error.error_code(),
            message: error.to_string(),
        }),
    )
        .into_response()
}

fn user_id_from(headers: &HeaderMap) -> String {
    headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

async fn check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckRequest>,
) -> Response {
    let user_id = user_id_from(&headers);

    let archive = match BASE64.decode(&request.source_archive) {
        Ok(bytes) => bytes,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: "source_archive must be valid base64".to_string(),
                }),
            )
                .into_response();
        }
    };

    match state
        .sequencer
        .handle(&user_id, &request.task_id, &archive)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error @ CoreError::TaskNotFound { .. }) => {
            error_response(StatusCode::NOT_FOUND, &error)
        }
        Err(error) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &error),
    }
}

/// Snapshot of a checking record returned by the status route.
#[derive(Debug, Serialize)]
pub struct CheckingSnapshot {
    /// Correlation id of the checking.
    pub correlation_id: Uuid,
    /// Submitting user.
    pub user_id: String,
    /// Target task.
    pub task_id: String,
    /// Human-readable task title.
    pub task_name: String,
    /// Current pipeline status.
    pub status: String,
    /// Compile outcome, once resolved.
    pub compiled: Option<OutcomeBody>,
    /// Verification outcome, once resolved.
    pub tested: Option<OutcomeBody>,
    /// Review outcome, once resolved.
    pub reviewed: Option<OutcomeBody>,
    /// When the checking was created.
    pub created_at: DateTime<Utc>,
    /// When the checking reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

/// One stage outcome in a snapshot.
#[derive(Debug, Serialize)]
pub struct OutcomeBody {
    /// Whether the worker succeeded.
    pub success: bool,
    /// Worker output text.
    pub message: String,
}

impl From<&StageOutcome> for OutcomeBody {
    fn from(outcome: &StageOutcome) -> Self {
        Self {
            success: outcome.success,
            message: outcome.message.clone(),
        }
    }
}

impl From<&Checking> for CheckingSnapshot {
    fn from(checking: &Checking) -> Self {
        Self {
            correlation_id: checking.correlation_id,
            user_id: checking.user_id.clone(),
            task_id: checking.task_id.clone(),
            task_name: checking.task_name.clone(),
            status: checking.status.to_string(),
            compiled: checking.compiled.as_ref().map(OutcomeBody::from),
            tested: checking.tested.as_ref().map(OutcomeBody::from),
            reviewed: checking.reviewed.as_ref().map(OutcomeBody::from),
            created_at: checking.created_at,
            completed_at: checking.completed_at,
        }
    }
}

async fn check_status(
    State(state): State<AppState>,
    Path(correlation_id): Path<Uuid>,
) -> Response {
    match state.orchestrator.store.load(correlation_id).await {
        Ok(Some(checking)) => {
            (StatusCode::OK, Json(CheckingSnapshot::from(&checking))).into_response()
        }
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &CoreError::CheckingNotFound { correlation_id },
        ),
        Err(error) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &error),
    }
}

#[derive(Debug, Serialize)]
struct CancelAccepted {
    correlation_id: Uuid,
}

async fn cancel(State(state): State<AppState>, Path(correlation_id): Path<Uuid>) -> Response {
    match state.orchestrator.store.load(correlation_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                &CoreError::CheckingNotFound { correlation_id },
            );
        }
        Err(error) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, &error),
    }

    if let Err(error) = state
        .orchestrator
        .bus
        .publish(CheckingMessage::CancelChecking(CancelChecking {
            correlation_id,
        }))
        .await
    {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, &error);
    }

    info!(%correlation_id, "Cancel published");
    (StatusCode::ACCEPTED, Json(CancelAccepted { correlation_id })).into_response()
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health(State(state): State<AppState>) -> Response {
    match state.orchestrator.store.health_check().await {
        Ok(true) => (StatusCode::OK, Json(HealthBody { status: "ok" })).into_response(),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthBody { status: "degraded" }),
        )
            .into_response(),
    }
}
