// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message bus abstraction for the checking pipeline.
//!
//! The orchestrator only assumes an at-least-once transport with two
//! operations: immediate publish and delayed publish. The delayed publish is
//! the durable-timer primitive: a stage deadline is a message scheduled with
//! a visibility delay, so it survives orchestrator restarts and can be
//! consumed by a different process than the one that armed it.
//!
//! [`InMemoryBus`] is the transport shipped with this crate, used by the
//! server wiring and the test harness. Any broker that can provide the same
//! two operations satisfies the trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use patterncheck_contracts::CheckingMessage;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::CoreError;

/// At-least-once message transport for pipeline events.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a message for immediate delivery.
    async fn publish(&self, message: CheckingMessage) -> Result<(), CoreError>;

    /// Publish a message that becomes visible to consumers after `delay`.
    async fn publish_delayed(
        &self,
        message: CheckingMessage,
        delay: Duration,
    ) -> Result<(), CoreError>;
}

/// In-process transport backed by an unbounded channel.
///
/// Delayed publishes are held back by a spawned timer task; messages whose
/// delay has not elapsed when the receiver is dropped are discarded, which is
/// fine for deadline signals - there is nothing left to time out.
#[derive(Clone)]
pub struct InMemoryBus {
    tx: mpsc::UnboundedSender<CheckingMessage>,
}

impl InMemoryBus {
    /// Create a bus and the receiver end consumed by the orchestrator runtime.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<CheckingMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, message: CheckingMessage) -> Result<(), CoreError> {
        debug!(
            kind = message.kind(),
            correlation_id = %message.correlation_id(),
            "Publishing message"
        );
        self.tx.send(message).map_err(|_| CoreError::BusError {
            details: "bus receiver dropped".to_string(),
        })
    }

    async fn publish_delayed(
        &self,
        message: CheckingMessage,
        delay: Duration,
    ) -> Result<(), CoreError> {
        debug!(
            kind = message.kind(),
            correlation_id = %message.correlation_id(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling delayed message"
        );
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the runtime shut down; nothing to deliver to.
            let _ = tx.send(message);
        });
        Ok(())
    }
}
