//! # guidora-server
//!
//! HTTP server for the guidora appointment-booking backend.
//!
//! This binary provides:
//! - REST API for OTP login, profiles, the specialist directory and bookings
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! GUIDORA_AUTH__JWT_SECRET=change-me cargo run --package guidora-server
//! ```
//!
//! Settings are read from `guidora.toml` (or the file named by
//! `GUIDORA_CONFIG`) and `GUIDORA_*` environment variables.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use guidora_core::AppConfig;
use guidora_server::api::create_router;
use guidora_server::logging;
use guidora_server::state::AppState;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let data_dir = config.data_dir()?;

    logging::init(config.server.production, &data_dir)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir.display(),
        "Starting guidora-server"
    );

    let state = AppState::from_config(&config).await?.shared();
    let app = create_router(state);

    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr).await?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
