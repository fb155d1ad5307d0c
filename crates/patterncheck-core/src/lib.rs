// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Patterncheck Core - Submission Checking Orchestrator
//!
//! This crate orchestrates the checking of a user's submitted source code
//! against a design-pattern task. The pipeline runs three stages on
//! independent worker services (compile, structural verification,
//! AI-assisted review) connected through an asynchronous message bus, while
//! the client observes it through one synchronous request with bounded wait
//! and partial-result degradation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        patterncheck-server                          │
//! │                    POST /check  (synchronous)                       │
//! └─────────────────────────────────────────────────────────────────────┘
//!                │                                      ▲
//!                ▼                                      │ CheckResult
//! ┌───────────────────────┐   wait    ┌─────────────────────────────────┐
//! │    CheckSequencer     │──────────►│        CompletionBridge         │
//! │  (this crate)         │           │  (id, stage) → one-shot signal  │
//! └───────────┬───────────┘           └─────────────────▲───────────────┘
//!             │ start                                   │ resolve
//!             ▼                                         │
//! ┌───────────────────────┐  messages ┌─────────────────┴───────────────┐
//! │      Message bus      │◄─────────►│     Orchestration handlers      │
//! │  (at-least-once)      │           │  state machine + checking store │
//! └───────────┬───────────┘           └─────────────────────────────────┘
//!             │
//!             ▼
//! ┌───────────────────────┐
//! │    Worker services    │
//! │ compiler / verifier / │
//! │       reviewer        │
//! └───────────────────────┘
//! ```
//!
//! # Checking state machine
//!
//! ```text
//!  Compiling ───► Testing ───► Reviewing ───► Passed
//!      │             │             │
//!      ├─ failed     ├─ failed     ├─ failed
//!      ├─ timeout ──► Failed ◄─ timeout ─ timeout
//!      └─ cancel ───► Canceled ◄── cancel
//! ```
//!
//! Successful stages auto-advance: the state machine itself publishes the
//! next stage request, so nothing external has to remember to push the
//! pipeline forward. Terminal states (Canceled, Failed, Passed) absorb every
//! further trigger, which makes duplicate and late deliveries safe.
//!
//! # Durability
//!
//! | Concern | Mechanism |
//! |---------|-----------|
//! | Checking record | [`persistence::CheckingStore`] (SQLite or in-memory) |
//! | Stage deadline | delayed bus message + persisted token ([`timeout`]) |
//! | Synchronous wait | in-process [`bridge::CompletionBridge`], bounded |
//!
//! Deadlines survive orchestrator restarts because they are messages with a
//! visibility delay, not in-process timers; the process consuming a deadline
//! does not have to be the one that armed it.
//!
//! # Modules
//!
//! - [`bridge`]: completion bridge between events and bounded waits
//! - [`bus`]: message bus trait and the in-memory transport
//! - [`config`]: stage deadlines and environment configuration
//! - [`error`]: error types with error-code mapping
//! - [`handlers`]: orchestration handlers for inbound pipeline messages
//! - [`persistence`]: checking records and store backends
//! - [`runtime`]: embeddable bus consumer loop
//! - [`sequencer`]: synchronous entry point composing the client result
//! - [`state`]: the pure checking state machine
//! - [`timeout`]: durable stage deadline supervisor

#![deny(missing_docs)]

/// Completion bridge between fire-and-forget events and bounded waits.
pub mod bridge;

/// Message bus abstraction and in-memory transport.
pub mod bus;

/// Stage deadlines and environment configuration.
pub mod config;

/// Error types for orchestrator operations.
pub mod error;

/// Orchestration handlers for inbound pipeline messages.
pub mod handlers;

/// Checking records and durable store backends.
pub mod persistence;

/// Embeddable orchestrator runtime.
pub mod runtime;

/// Synchronous stage sequencer.
pub mod sequencer;

/// The pure checking state machine.
pub mod state;

/// Durable stage deadline supervisor.
pub mod timeout;
