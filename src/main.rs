// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Tandem API Server
//!
//! Serves the availability-planning API: Google Calendar OAuth, free/busy
//! syncing, and the merged manual + external availability view.

use std::sync::Arc;
use tandem_api::{
    config::Config,
    db::Db,
    services::{AvailabilityService, CalendarSyncService, GoogleClient, TokenCipher},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting Tandem API");

    // Open the SQLite database (creates the schema on first run)
    let db = Db::open(&config.database_path).expect("Failed to open database");
    tracing::info!(path = %config.database_path, "Database ready");

    // Token cipher for OAuth credentials at rest
    let cipher =
        TokenCipher::new(&config.token_encryption_key).expect("Failed to initialize token cipher");

    // Per-account refresh locks, shared across all service clones
    let refresh_locks = Arc::new(dashmap::DashMap::new());

    let google = GoogleClient::new(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        config.oauth_redirect_uri(),
    );

    let sync_service = CalendarSyncService::new(
        google,
        db.clone(),
        cipher,
        refresh_locks,
        config.sync_horizon_weeks,
    );
    let availability_service = AvailabilityService::new(db.clone());

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        sync_service,
        availability_service,
    });

    // Build router
    let app = tandem_api::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tandem_api=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
