use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use branch_sync::binding::{LogRenderer, bind};
use branch_sync::config::SyncConfig;
use branch_sync::github::OctocrabClient;
use branch_sync::server::{AppState, build_router};
use branch_sync::workflow::SyncSession;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "branch_sync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncConfig::parse();
    config.validate().context("invalid configuration")?;
    tracing::info!(?config, "Starting branch sync");

    let client = OctocrabClient::from_token(&config.token, config.repo_id())
        .context("building GitHub client")?;
    let session = SyncSession::connect(Arc::new(client), config.sync_options())
        .context("building sync workflow")?;
    let renderer = bind(session.actor(), config.binding(), LogRenderer);

    let app = build_router(AppState::new(session, config.binding()));

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    tracing::info!("listening on {}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
        .context("serving HTTP")?;

    // The router, and with it the session, is gone; the renderer sees the
    // actor stop and exits.
    renderer.await.context("joining renderer")?;
    tracing::info!("Shut down");
    Ok(())
}
