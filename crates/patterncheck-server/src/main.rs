// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Patterncheck Server - HTTP API over the checking orchestrator
//!
//! Wires the SQLite checking store, the in-memory bus, the orchestrator
//! runtime and the collaborator clients, then serves the synchronous API.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use patterncheck_core::bus::InMemoryBus;
use patterncheck_core::config::Config;
use patterncheck_core::handlers::OrchestratorState;
use patterncheck_core::persistence::SqliteStore;
use patterncheck_core::runtime::OrchestratorRuntime;
use patterncheck_core::sequencer::CheckSequencer;
use patterncheck_server::clients::{HttpReviewArtifacts, HttpTaskCatalog};
use patterncheck_server::{AppState, router};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("patterncheck_core=info".parse().unwrap())
                .add_directive("patterncheck_server=info".parse().unwrap()),
        )
        .init();

    info!("Starting Patterncheck Server");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        database_path = %config.database_path.display(),
        compile_timeout_secs = config.timeouts.compile.as_secs(),
        verify_timeout_secs = config.timeouts.verify.as_secs(),
        review_timeout_secs = config.timeouts.review.as_secs(),
        "Configuration loaded"
    );

    // Durable store (runs migrations)
    info!("Opening checking store...");
    let store = Arc::new(SqliteStore::from_path(&config.database_path).await?);
    info!("Checking store ready");

    // Bus and orchestrator
    let (bus, receiver) = InMemoryBus::channel();
    let orchestrator = Arc::new(OrchestratorState::new(
        store,
        bus.clone(),
        config.timeouts,
    ));

    let runtime = OrchestratorRuntime::builder()
        .state(orchestrator.clone())
        .receiver(receiver)
        .build()?
        .start();

    // Collaborators and sequencer
    let catalog = Arc::new(HttpTaskCatalog::new(config.catalog_url.clone()));
    let artifacts = Arc::new(HttpReviewArtifacts::new(config.storage_url.clone()));
    let sequencer = Arc::new(CheckSequencer::new(
        orchestrator.clone(),
        catalog,
        artifacts,
    ));

    let app = router(AppState {
        sequencer,
        orchestrator,
    });

    info!(addr = %config.http_addr, "HTTP server starting");
    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;

    runtime.shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}
