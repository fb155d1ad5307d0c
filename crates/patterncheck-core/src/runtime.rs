// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable orchestrator runtime.
//!
//! This module provides [`OrchestratorRuntime`] which consumes the bus
//! receiver inside an existing tokio application. Dispatch errors are logged
//! and do not stop the loop; one poisoned message must not stall every other
//! submission.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use patterncheck_core::bus::InMemoryBus;
//! use patterncheck_core::config::StageTimeouts;
//! use patterncheck_core::handlers::OrchestratorState;
//! use patterncheck_core::persistence::MemoryStore;
//! use patterncheck_core::runtime::OrchestratorRuntime;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let (bus, rx) = InMemoryBus::channel();
//! let state = Arc::new(OrchestratorState::new(
//!     Arc::new(MemoryStore::new()),
//!     bus,
//!     StageTimeouts::default(),
//! ));
//!
//! let runtime = OrchestratorRuntime::builder()
//!     .state(state)
//!     .receiver(rx)
//!     .build()?
//!     .start();
//!
//! // ... serve requests ...
//!
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use anyhow::Result;
use patterncheck_contracts::CheckingMessage;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::handlers::{self, OrchestratorState};

/// Builder for creating an [`OrchestratorRuntime`].
#[derive(Default)]
pub struct OrchestratorRuntimeBuilder {
    state: Option<Arc<OrchestratorState>>,
    receiver: Option<mpsc::UnboundedReceiver<CheckingMessage>>,
}

impl std::fmt::Debug for OrchestratorRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorRuntimeBuilder")
            .field("state", &self.state.as_ref().map(|_| "..."))
            .field("receiver", &self.receiver.as_ref().map(|_| "..."))
            .finish()
    }
}

impl OrchestratorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shared handler state (required).
    pub fn state(mut self, state: Arc<OrchestratorState>) -> Self {
        self.state = Some(state);
        self
    }

    /// Set the bus receiver to consume (required).
    pub fn receiver(mut self, receiver: mpsc::UnboundedReceiver<CheckingMessage>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<OrchestratorRuntimeConfig> {
        let state = self.state.ok_or_else(|| anyhow::anyhow!("state is required"))?;
        let receiver = self
            .receiver
            .ok_or_else(|| anyhow::anyhow!("receiver is required"))?;
        Ok(OrchestratorRuntimeConfig { state, receiver })
    }
}

/// Configuration for an [`OrchestratorRuntime`].
pub struct OrchestratorRuntimeConfig {
    state: Arc<OrchestratorState>,
    receiver: mpsc::UnboundedReceiver<CheckingMessage>,
}

impl OrchestratorRuntimeConfig {
    /// Start the runtime, spawning the consumer loop.
    pub fn start(self) -> OrchestratorRuntime {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = self.state.clone();
        let handle = tokio::spawn(run_consumer_loop(self.receiver, state, shutdown_rx));

        info!("Orchestrator runtime started");

        OrchestratorRuntime {
            handle,
            shutdown_tx,
            state: self.state,
        }
    }
}

/// A running orchestrator loop that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct OrchestratorRuntime {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    state: Arc<OrchestratorState>,
}

impl OrchestratorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> OrchestratorRuntimeBuilder {
        OrchestratorRuntimeBuilder::new()
    }

    /// Get a reference to the shared handler state.
    pub fn state(&self) -> &Arc<OrchestratorState> {
        &self.state
    }

    /// Check if the consumer loop is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("Orchestrator runtime shutting down...");
        let _ = self.shutdown_tx.send(true);
        match self.handle.await {
            Ok(()) => {
                info!("Orchestrator runtime shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Orchestrator consumer task panicked: {}", e);
                Err(anyhow::anyhow!("consumer task panicked: {}", e))
            }
        }
    }
}

async fn run_consumer_loop(
    mut receiver: mpsc::UnboundedReceiver<CheckingMessage>,
    state: Arc<OrchestratorState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Orchestrator consumer received shutdown signal");
                    break;
                }
            }

            message = receiver.recv() => {
                match message {
                    Some(message) => {
                        debug!(
                            kind = message.kind(),
                            correlation_id = %message.correlation_id(),
                            "Dispatching message"
                        );
                        if let Err(e) = handlers::dispatch(&state, message).await {
                            error!(error = %e, "Failed to handle message");
                        }
                    }
                    None => {
                        // All senders dropped; nothing left to consume.
                        break;
                    }
                }
            }
        }
    }

    info!("Orchestrator consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::config::StageTimeouts;
    use crate::persistence::MemoryStore;

    fn test_state(bus: Arc<InMemoryBus>) -> Arc<OrchestratorState> {
        Arc::new(OrchestratorState::new(
            Arc::new(MemoryStore::new()),
            bus,
            StageTimeouts::default(),
        ))
    }

    #[test]
    fn test_builder_missing_state() {
        let (_bus, rx) = InMemoryBus::channel();
        let result = OrchestratorRuntimeBuilder::new().receiver(rx).build();
        let err = result.err().expect("build must fail");
        assert!(err.to_string().contains("state is required"));
    }

    #[tokio::test]
    async fn test_builder_missing_receiver() {
        let (bus, _rx) = InMemoryBus::channel();
        let result = OrchestratorRuntimeBuilder::new()
            .state(test_state(bus))
            .build();
        let err = result.err().expect("build must fail");
        assert!(err.to_string().contains("receiver is required"));
    }

    #[test]
    fn test_builder_debug_hides_internals() {
        let builder = OrchestratorRuntimeBuilder::new();
        let debug_str = format!("{:?}", builder);
        assert!(debug_str.contains("OrchestratorRuntimeBuilder"));
    }

    #[tokio::test]
    async fn test_runtime_start_and_shutdown() {
        let (bus, rx) = InMemoryBus::channel();
        let state = test_state(bus);

        let runtime = OrchestratorRuntimeBuilder::new()
            .state(state)
            .receiver(rx)
            .build()
            .unwrap()
            .start();

        assert!(runtime.is_running());
        let _state = runtime.state();
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_runtime_processes_published_messages() {
        use crate::bus::MessageBus;
        use crate::state::CheckStatus;
        use patterncheck_contracts::{CheckingMessage, StartChecking};
        use uuid::Uuid;

        let (bus, rx) = InMemoryBus::channel();
        let state = test_state(bus.clone());

        let runtime = OrchestratorRuntime::builder()
            .state(state.clone())
            .receiver(rx)
            .build()
            .unwrap()
            .start();

        let id = Uuid::new_v4();
        bus.publish(CheckingMessage::StartChecking(StartChecking {
            correlation_id: id,
            user_id: "user-1".to_string(),
            task_id: "facade".to_string(),
            task_name: "Facade".to_string(),
        }))
        .await
        .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                if let Some(checking) = state.store.load(id).await.unwrap() {
                    assert_eq!(checking.status, CheckStatus::Compiling);
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("start message should be processed");

        runtime.shutdown().await.unwrap();
    }
}
