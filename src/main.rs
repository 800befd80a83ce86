use anyhow::Context;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod clock;
mod config;
mod db;
mod error;
mod routes;
mod state;

mod crypto {
    pub mod password;
    pub mod token;
}

mod models {
    pub mod api_token;
    pub mod principal;
    pub mod session;
    pub mod user;
}

mod repositories {
    #[cfg(test)]
    pub mod memory;
    pub mod postgres;
    pub mod store;
}

mod services {
    pub mod auth;
}

mod handlers {
    pub mod api;
    pub mod auth;
    pub mod pages;
}

mod middleware_layer {
    pub mod auth;
    pub mod csrf;
    pub mod guards;
    pub mod rate_limit;
    pub mod responder;
    pub mod trace;
}

mod validation {
    pub mod auth;
}

use config::Config;
use state::AppState;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    let sweepers = state.spawn_sweepers();
    let app = routes::build_router(&state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("🚀 Listening on http://{}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    for sweeper in sweepers {
        sweeper.stop().await;
    }
    tracing::info!("👋 Shutdown complete");

    Ok(())
}
