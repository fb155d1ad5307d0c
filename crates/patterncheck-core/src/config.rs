// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use patterncheck_contracts::Stage;

/// Per-stage deadlines for the checking pipeline.
///
/// Passed into the sequencer and the orchestration handlers at construction;
/// the deadlines are configuration, not contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    /// Deadline for the compile stage.
    pub compile: Duration,
    /// Deadline for the verification stage.
    pub verify: Duration,
    /// Deadline for the review stage.
    pub review: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            compile: Duration::from_secs(120),
            verify: Duration::from_secs(120),
            review: Duration::from_secs(600),
        }
    }
}

impl StageTimeouts {
    /// Deadline for the given stage.
    pub fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Compile => self.compile,
            Stage::Verify => self.verify,
            Stage::Review => self.review,
        }
    }
}

/// Patterncheck orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file for checking records
    pub database_path: PathBuf,
    /// HTTP server address for the synchronous check endpoint
    pub http_addr: SocketAddr,
    /// Base URL of the task catalog collaborator
    pub catalog_url: String,
    /// Base URL of the artifact storage collaborator
    pub storage_url: String,
    /// Per-stage deadlines
    pub timeouts: StageTimeouts,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `PATTERNCHECK_DATABASE_PATH`: SQLite database file path
    /// - `PATTERNCHECK_CATALOG_URL`: task catalog base URL
    /// - `PATTERNCHECK_STORAGE_URL`: artifact storage base URL
    ///
    /// Optional (with defaults):
    /// - `PATTERNCHECK_HTTP_PORT`: HTTP server port (default: 8080)
    /// - `PATTERNCHECK_COMPILE_TIMEOUT_SECS`: compile deadline (default: 120)
    /// - `PATTERNCHECK_VERIFY_TIMEOUT_SECS`: verify deadline (default: 120)
    /// - `PATTERNCHECK_REVIEW_TIMEOUT_SECS`: review deadline (default: 600)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path = std::env::var("PATTERNCHECK_DATABASE_PATH")
            .map_err(|_| ConfigError::Missing("PATTERNCHECK_DATABASE_PATH"))?;

        let catalog_url = std::env::var("PATTERNCHECK_CATALOG_URL")
            .map_err(|_| ConfigError::Missing("PATTERNCHECK_CATALOG_URL"))?;

        let storage_url = std::env::var("PATTERNCHECK_STORAGE_URL")
            .map_err(|_| ConfigError::Missing("PATTERNCHECK_STORAGE_URL"))?;

        let http_port: u16 = std::env::var("PATTERNCHECK_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("PATTERNCHECK_HTTP_PORT", "must be a valid port number")
            })?;

        let defaults = StageTimeouts::default();
        let timeouts = StageTimeouts {
            compile: timeout_from_env("PATTERNCHECK_COMPILE_TIMEOUT_SECS", defaults.compile)?,
            verify: timeout_from_env("PATTERNCHECK_VERIFY_TIMEOUT_SECS", defaults.verify)?,
            review: timeout_from_env("PATTERNCHECK_REVIEW_TIMEOUT_SECS", defaults.review)?,
        };

        Ok(Self {
            database_path: PathBuf::from(database_path),
            http_addr: SocketAddr::from(([0, 0, 0, 0], http_port)),
            catalog_url,
            storage_url,
            timeouts,
        })
    }
}

fn timeout_from_env(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => {
            let secs: u64 = raw
                .parse()
                .map_err(|_| ConfigError::Invalid(var, "must be a positive integer"))?;
            if secs == 0 {
                return Err(ConfigError::Invalid(var, "must be greater than zero"));
            }
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    fn set_required(guard: &mut EnvGuard) {
        guard.set("PATTERNCHECK_DATABASE_PATH", ".data/test.db");
        guard.set("PATTERNCHECK_CATALOG_URL", "http://localhost:9001");
        guard.set("PATTERNCHECK_STORAGE_URL", "http://localhost:9002");
    }

    #[test]
    fn test_stage_timeout_defaults() {
        let timeouts = StageTimeouts::default();
        assert_eq!(timeouts.compile, Duration::from_secs(120));
        assert_eq!(timeouts.verify, Duration::from_secs(120));
        assert_eq!(timeouts.review, Duration::from_secs(600));
    }

    #[test]
    fn test_for_stage() {
        let timeouts = StageTimeouts {
            compile: Duration::from_secs(1),
            verify: Duration::from_secs(2),
            review: Duration::from_secs(3),
        };
        assert_eq!(timeouts.for_stage(Stage::Compile), Duration::from_secs(1));
        assert_eq!(timeouts.for_stage(Stage::Verify), Duration::from_secs(2));
        assert_eq!(timeouts.for_stage(Stage::Review), Duration::from_secs(3));
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        set_required(&mut guard);
        guard.remove("PATTERNCHECK_HTTP_PORT");
        guard.remove("PATTERNCHECK_COMPILE_TIMEOUT_SECS");
        guard.remove("PATTERNCHECK_VERIFY_TIMEOUT_SECS");
        guard.remove("PATTERNCHECK_REVIEW_TIMEOUT_SECS");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_path, PathBuf::from(".data/test.db"));
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.catalog_url, "http://localhost:9001");
        assert_eq!(config.storage_url, "http://localhost:9002");
        assert_eq!(config.timeouts, StageTimeouts::default());
    }

    #[test]
    fn test_config_from_env_custom_timeouts() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        set_required(&mut guard);
        guard.set("PATTERNCHECK_HTTP_PORT", "8181");
        guard.set("PATTERNCHECK_COMPILE_TIMEOUT_SECS", "30");
        guard.set("PATTERNCHECK_VERIFY_TIMEOUT_SECS", "45");
        guard.set("PATTERNCHECK_REVIEW_TIMEOUT_SECS", "90");

        let config = Config::from_env().unwrap();

        assert_eq!(config.http_addr.port(), 8181);
        assert_eq!(config.timeouts.compile, Duration::from_secs(30));
        assert_eq!(config.timeouts.verify, Duration::from_secs(45));
        assert_eq!(config.timeouts.review, Duration::from_secs(90));
    }

    #[test]
    fn test_config_missing_database_path() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("PATTERNCHECK_DATABASE_PATH");
        guard.set("PATTERNCHECK_CATALOG_URL", "http://localhost:9001");
        guard.set("PATTERNCHECK_STORAGE_URL", "http://localhost:9002");

        let result = Config::from_env();
        let err = result.unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Missing("PATTERNCHECK_DATABASE_PATH")
        ));
        assert!(err.to_string().contains("PATTERNCHECK_DATABASE_PATH"));
    }

    #[test]
    fn test_config_invalid_port() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        set_required(&mut guard);
        guard.set("PATTERNCHECK_HTTP_PORT", "not_a_port");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("PATTERNCHECK_HTTP_PORT", _)
        ));
    }

    #[test]
    fn test_config_zero_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        set_required(&mut guard);
        guard.set("PATTERNCHECK_REVIEW_TIMEOUT_SECS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("PATTERNCHECK_REVIEW_TIMEOUT_SECS", _)
        ));
    }

    #[test]
    fn test_config_invalid_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        set_required(&mut guard);
        guard.set("PATTERNCHECK_COMPILE_TIMEOUT_SECS", "two minutes");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("PATTERNCHECK_COMPILE_TIMEOUT_SECS", _)
        ));
    }
}
