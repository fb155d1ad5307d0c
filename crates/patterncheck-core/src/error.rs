// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for patterncheck-core.
//!
//! Stage failures (compile errors, failed verification, rejected reviews) are
//! never represented here - they are business data carried in stage outcomes
//! and drive state transitions. `CoreError` covers the infrastructure
//! surface: missing records, unreachable collaborators, broken stores.

use std::fmt;
use uuid::Uuid;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur while orchestrating a checking.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum CoreError {
    /// The task does not exist in the catalog.
    TaskNotFound {
        /// The task id that was not found.
        task_id: String,
    },

    /// No checking record exists for the correlation id.
    CheckingNotFound {
        /// The correlation id that was not found.
        correlation_id: Uuid,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Publishing on the message bus failed.
    BusError {
        /// Error details.
        details: String,
    },

    /// The task catalog collaborator could not be reached.
    CatalogUnavailable {
        /// Error details.
        details: String,
    },

    /// The artifact storage collaborator could not be reached.
    StorageUnavailable {
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TaskNotFound { .. } => "TASK_NOT_FOUND",
            Self::CheckingNotFound { .. } => "CHECKING_NOT_FOUND",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
            Self::BusError { .. } => "BUS_ERROR",
            Self::CatalogUnavailable { .. } => "CATALOG_UNAVAILABLE",
            Self::StorageUnavailable { .. } => "STORAGE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TaskNotFound { task_id } => {
                write!(f, "Task '{}' not found", task_id)
            }
            Self::CheckingNotFound { correlation_id } => {
                write!(f, "Checking '{}' not found", correlation_id)
            }
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
            Self::BusError { details } => {
                write!(f, "Message bus error: {}", details)
            }
            Self::CatalogUnavailable { details } => {
                write!(f, "Task catalog unavailable: {}", details)
            }
            Self::StorageUnavailable { details } => {
                write!(f, "Artifact storage unavailable: {}", details)
            }
        }
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (
                CoreError::TaskNotFound {
                    task_id: "singleton".to_string(),
                },
                "TASK_NOT_FOUND",
            ),
            (
                CoreError::CheckingNotFound {
                    correlation_id: Uuid::nil(),
                },
                "CHECKING_NOT_FOUND",
            ),
            (
                CoreError::ValidationError {
                    field: "task_id".to_string(),
                    message: "must not be empty".to_string(),
                },
                "VALIDATION_ERROR",
            ),
            (
                CoreError::DatabaseError {
                    operation: "insert".to_string(),
                    details: "disk full".to_string(),
                },
                "DATABASE_ERROR",
            ),
            (
                CoreError::BusError {
                    details: "receiver dropped".to_string(),
                },
                "BUS_ERROR",
            ),
            (
                CoreError::CatalogUnavailable {
                    details: "connection refused".to_string(),
                },
                "CATALOG_UNAVAILABLE",
            ),
            (
                CoreError::StorageUnavailable {
                    details: "timeout".to_string(),
                },
                "STORAGE_UNAVAILABLE",
            ),
        ];

        for (error, expected_code) in test_cases {
            assert_eq!(
                error.error_code(),
                expected_code,
                "Error {:?} should have code {}",
                error,
                expected_code
            );
            assert!(!error.to_string().is_empty(), "Message should not be empty");
        }
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::TaskNotFound {
            task_id: "observer".to_string(),
        };
        assert_eq!(err.to_string(), "Task 'observer' not found");

        let err = CoreError::ValidationError {
            field: "user_id".to_string(),
            message: "must not be empty".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Validation error for 'user_id': must not be empty"
        );

        let err = CoreError::DatabaseError {
            operation: "update".to_string(),
            details: "locked".to_string(),
        };
        assert_eq!(err.to_string(), "Database error during 'update': locked");
    }
}
