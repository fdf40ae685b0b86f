mod agent;
mod config;
mod errors;
mod models;
mod routes;
mod service;

use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::GeminiAgentService;
use crate::config::{CredentialSource, EnvCredential, ServerConfig, API_KEY_VAR};
use crate::service::chat_service::ChatService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    let cfg = ServerConfig::from_env();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cfg.default_log_filter.as_str().into()),
        )
        .init();

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let credentials = EnvCredential;
    if credentials.api_key().is_none() {
        // Checked again on every request; a key added later is picked up.
        warn!("{API_KEY_VAR} is not set; chat requests will fail until it is");
    }
    let agent = GeminiAgentService::new(cfg.gemini_base_url.clone());
    let chat_service =
        ChatService::new(Arc::new(credentials), Arc::new(agent), cfg.model.clone());

    // ── Router ────────────────────────────────────────────────────────────────
    let app = routes::build(chat_service);

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = cfg.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(model = %cfg.model, "Listening on http://{addr}/");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
