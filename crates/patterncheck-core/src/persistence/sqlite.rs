// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed checking store.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patterncheck_contracts::Stage;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use crate::error::CoreError;
use crate::state::CheckStatus;

use super::{ArmedTimeout, Checking, CheckingStore, StageOutcome};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed checking store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool. Migrations are not run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a file path.
    ///
    /// Creates parent directories and the database file if missing, connects
    /// with sensible defaults and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::DatabaseError {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// Run migrations on an externally managed pool.
    pub async fn migrate(pool: &SqlitePool) -> Result<(), CoreError> {
        MIGRATOR
            .run(pool)
            .await
            .map_err(|e| CoreError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })
    }
}

#[derive(sqlx::FromRow)]
struct CheckingRow {
    correlation_id: String,
    user_id: String,
    task_id: String,
    task_name: String,
    pattern_name: String,
    status: String,
    compiled_success: Option<bool>,
    compiled_message: Option<String>,
    tested_success: Option<bool>,
    tested_message: Option<String>,
    reviewed_success: Option<bool>,
    reviewed_message: Option<String>,
    timeout_stage: Option<String>,
    timeout_token: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

fn decode_error(column: &str, details: impl std::fmt::Display) -> CoreError {
    CoreError::DatabaseError {
        operation: "decode".to_string(),
        details: format!("column '{}': {}", column, details),
    }
}

fn outcome_from_columns(
    success: Option<bool>,
    message: Option<String>,
) -> Option<StageOutcome> {
    success.map(|success| StageOutcome {
        success,
        message: message.unwrap_or_default(),
    })
}

impl TryFrom<CheckingRow> for Checking {
    type Error = CoreError;

    fn try_from(row: CheckingRow) -> Result<Self, CoreError> {
        let correlation_id = Uuid::parse_str(&row.correlation_id)
            .map_err(|e| decode_error("correlation_id", e))?;
        let status = CheckStatus::parse(&row.status)
            .ok_or_else(|| decode_error("status", format!("unknown status '{}'", row.status)))?;

        let active_timeout = match (row.timeout_stage, row.timeout_token) {
            (Some(stage), Some(token)) => Some(ArmedTimeout {
                stage: Stage::parse(&stage)
                    .ok_or_else(|| decode_error("timeout_stage", format!("unknown stage '{}'", stage)))?,
                token: Uuid::parse_str(&token).map_err(|e| decode_error("timeout_token", e))?,
            }),
            (None, None) => None,
            _ => {
                return Err(decode_error(
                    "timeout_stage",
                    "stage and token must be set together",
                ));
            }
        };

        Ok(Checking {
            correlation_id,
            user_id: row.user_id,
            task_id: row.task_id,
            task_name: row.task_name,
            pattern_name: row.pattern_name,
            status,
            compiled: outcome_from_columns(row.compiled_success, row.compiled_message),
            tested: outcome_from_columns(row.tested_success, row.tested_message),
            reviewed: outcome_from_columns(row.reviewed_success, row.reviewed_message),
            active_timeout,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[async_trait]
impl CheckingStore for SqliteStore {
    async fn create_if_absent(&self, checking: &Checking) -> Result<bool, CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO checkings (
                correlation_id, user_id, task_id, task_name, pattern_name,
                status, compiled_success, compiled_message,
                tested_success, tested_message,
                reviewed_success, reviewed_message,
                timeout_stage, timeout_token,
                created_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (correlation_id) DO NOTHING
            "#,
        )
        .bind(checking.correlation_id.to_string())
        .bind(&checking.user_id)
        .bind(&checking.task_id)
        .bind(&checking.task_name)
        .bind(&checking.pattern_name)
        .bind(checking.status.as_str())
        .bind(checking.compiled.as_ref().map(|o| o.success))
        .bind(checking.compiled.as_ref().map(|o| o.message.as_str()))
        .bind(checking.tested.as_ref().map(|o| o.success))
        .bind(checking.tested.as_ref().map(|o| o.message.as_str()))
        .bind(checking.reviewed.as_ref().map(|o| o.success))
        .bind(checking.reviewed.as_ref().map(|o| o.message.as_str()))
        .bind(checking.active_timeout.map(|t| t.stage.as_str()))
        .bind(checking.active_timeout.map(|t| t.token.to_string()))
        .bind(checking.created_at)
        .bind(checking.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn load(&self, correlation_id: Uuid) -> Result<Option<Checking>, CoreError> {
        let row = sqlx::query_as::<_, CheckingRow>(
            r#"
            SELECT correlation_id, user_id, task_id, task_name, pattern_name,
                   status, compiled_success, compiled_message,
                   tested_success, tested_message,
                   reviewed_success, reviewed_message,
                   timeout_stage, timeout_token,
                   created_at, completed_at
            FROM checkings
            WHERE correlation_id = ?
            "#,
        )
        .bind(correlation_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Checking::try_from).transpose()
    }

    async fn save(&self, checking: &Checking) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE checkings
            SET status = ?,
                compiled_success = ?, compiled_message = ?,
                tested_success = ?, tested_message = ?,
                reviewed_success = ?, reviewed_message = ?,
                timeout_stage = ?, timeout_token = ?,
                completed_at = ?
            WHERE correlation_id = ?
            "#,
        )
        .bind(checking.status.as_str())
        .bind(checking.compiled.as_ref().map(|o| o.success))
        .bind(checking.compiled.as_ref().map(|o| o.message.as_str()))
        .bind(checking.tested.as_ref().map(|o| o.success))
        .bind(checking.tested.as_ref().map(|o| o.message.as_str()))
        .bind(checking.reviewed.as_ref().map(|o| o.success))
        .bind(checking.reviewed.as_ref().map(|o| o.message.as_str()))
        .bind(checking.active_timeout.map(|t| t.stage.as_str()))
        .bind(checking.active_timeout.map(|t| t.token.to_string()))
        .bind(checking.completed_at)
        .bind(checking.correlation_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::CheckingNotFound {
                correlation_id: checking.correlation_id,
            });
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, CoreError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
