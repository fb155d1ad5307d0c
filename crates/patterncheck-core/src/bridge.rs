// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Completion bridge between fire-and-forget events and bounded waits.
//!
//! The sequencer publishes a stage request and then needs to observe the
//! asynchronous outcome without blocking a thread. Workers respond through
//! the bus; the orchestration handlers resolve the bridge; the sequencer
//! waits on it with a deadline.
//!
//! Entries are keyed by correlation id plus stage. The stage in the key
//! matters because the pipeline auto-chains: a fast verification worker can
//! resolve its stage before the sequencer has consumed the stored compile
//! outcome, and under a correlation-only key the later resolve would be
//! dropped as a duplicate, stranding the waiter until its deadline.
//!
//! Each entry is created lazily by whichever side arrives first. A worker
//! may respond before the caller starts waiting (the bus does not order
//! delivery against waiter registration), so `resolve` with no registered
//! waiter stores the signal and the subsequent `wait` returns immediately
//! instead of sleeping until its deadline. Only the first `resolve` for a
//! pending entry has effect; later resolves for the same key are dropped.
//! The map is sharded so unrelated submissions never contend on one lock.
//!
//! An entry resolved after its waiter already gave up stays until the next
//! wait for the same key consumes it; such leftovers are bounded by one
//! signal per stage of a checking, since terminal states stop resolving.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::Duration;

use patterncheck_contracts::Stage;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

const SHARD_COUNT: usize = 16;

/// Resolved outcome of one stage wait.
#[derive(Debug, Clone, PartialEq)]
pub enum StageSignal {
    /// A worker reported the stage outcome.
    Completed {
        /// Whether the worker succeeded.
        success: bool,
        /// Worker output text.
        message: String,
    },
    /// The durable stage deadline fired before any worker response.
    DeadlineElapsed,
    /// The checking was cancelled by the client.
    Canceled,
}

type WaiterKey = (Uuid, Stage);

enum Slot {
    Ready(StageSignal),
    Waiting(oneshot::Sender<StageSignal>),
}

/// Correlation-keyed registry of pending stage waiters.
pub struct CompletionBridge {
    shards: Vec<Mutex<HashMap<WaiterKey, Slot>>>,
}

impl Default for CompletionBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionBridge {
    /// Create an empty bridge.
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, key: &WaiterKey) -> &Mutex<HashMap<WaiterKey, Slot>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Resolve the pending wait for one stage of a checking.
    ///
    /// Wakes the registered waiter exactly once, or stores the signal for a
    /// waiter that has not registered yet. A second resolve for the same
    /// pending entry is dropped.
    pub fn resolve(&self, correlation_id: Uuid, stage: Stage, signal: StageSignal) {
        let key = (correlation_id, stage);
        let mut map = self.shard(&key).lock().expect("bridge shard lock poisoned");
        match map.entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Ready(signal));
            }
            Entry::Occupied(occupied) => match occupied.get() {
                Slot::Ready(_) => {
                    debug!(%correlation_id, %stage, "Dropping duplicate resolve");
                }
                Slot::Waiting(_) => {
                    let Slot::Waiting(tx) = occupied.remove() else {
                        unreachable!("entry checked as Waiting")
                    };
                    // Waiter may have given up between registration and now.
                    let _ = tx.send(signal);
                }
            },
        }
    }

    /// Wait up to `deadline` for the signal for one stage of a checking.
    ///
    /// Returns `None` when the deadline expires with no resolution - the
    /// stage is unresolved, not failed. A resolve racing the expiry wins:
    /// the real outcome is returned if it landed before the waiter was
    /// removed.
    pub async fn wait(
        &self,
        correlation_id: Uuid,
        stage: Stage,
        deadline: Duration,
    ) -> Option<StageSignal> {
        let key = (correlation_id, stage);
        let mut rx = {
            let mut map = self.shard(&key).lock().expect("bridge shard lock poisoned");
            match map.remove(&key) {
                Some(Slot::Ready(signal)) => return Some(signal),
                // A stale waiter for the same key is replaced; one waiter per
                // stage of a checking at a time.
                Some(Slot::Waiting(_)) | None => {
                    let (tx, rx) = oneshot::channel();
                    map.insert(key, Slot::Waiting(tx));
                    rx
                }
            }
        };

        match tokio::time::timeout(deadline, &mut rx).await {
            Ok(Ok(signal)) => Some(signal),
            Ok(Err(_)) => None,
            Err(_) => {
                let mut map = self.shard(&key).lock().expect("bridge shard lock poisoned");
                if matches!(map.get(&key), Some(Slot::Waiting(_))) {
                    map.remove(&key);
                }
                drop(map);
                // The resolver may have taken our sender just before expiry.
                rx.try_recv().ok()
            }
        }
    }

    /// Number of pending entries, for diagnostics.
    pub fn pending(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().expect("bridge shard lock poisoned").len())
            .sum()
    }
}
