// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stage timeout supervisor.
//!
//! Deadlines are durable: arming a stage publishes a [`StageDeadlineElapsed`]
//! message with a visibility delay instead of starting an in-process timer,
//! because the orchestrator handling the stage completion may not be the
//! process that armed the deadline.
//!
//! There is no unschedule on an at-least-once bus, so disarming works by
//! token invalidation: the token returned by [`TimeoutSupervisor::arm`] is
//! persisted on the checking record and cleared when the stage resolves.
//! When the deadline message eventually arrives, a token that no longer
//! matches the record means the stage already resolved and the firing is a
//! no-op. The race between a real stage outcome and the deadline is settled
//! by whichever is processed first under the per-key lock.

use std::sync::Arc;
use std::time::Duration;

use patterncheck_contracts::{CheckingMessage, Stage, StageDeadlineElapsed};
use tracing::debug;
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::error::CoreError;
use crate::persistence::{ArmedTimeout, Checking};

/// Schedules durable per-stage deadlines on the bus.
pub struct TimeoutSupervisor {
    bus: Arc<dyn MessageBus>,
}

impl TimeoutSupervisor {
    /// Create a supervisor publishing on the given bus.
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// Arm the deadline for a stage.
    ///
    /// Publishes the delayed deadline message and returns the token the
    /// caller must persist on the checking record before the stage request
    /// goes out. A deadline firing with a token that was never persisted is
    /// dropped like any other stale one.
    pub async fn arm(
        &self,
        correlation_id: Uuid,
        stage: Stage,
        duration: Duration,
    ) -> Result<ArmedTimeout, CoreError> {
        let token = Uuid::new_v4();
        debug!(
            %correlation_id,
            %stage,
            %token,
            deadline_ms = duration.as_millis() as u64,
            "Arming stage deadline"
        );
        self.bus
            .publish_delayed(
                CheckingMessage::StageDeadlineElapsed(StageDeadlineElapsed {
                    correlation_id,
                    stage,
                    token,
                }),
                duration,
            )
            .await?;
        Ok(ArmedTimeout { stage, token })
    }

    /// Whether a fired deadline is still live for the record.
    pub fn is_live(checking: &Checking, stage: Stage, token: Uuid) -> bool {
        checking
            .active_timeout
            .as_ref()
            .is_some_and(|armed| armed.stage == stage && armed.token == token)
    }
}
