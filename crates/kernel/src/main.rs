//! Formwork server
//!
//! Serves the contact form over HTTP.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use formwork_kernel::config::Config;
use formwork_kernel::state::AppState;
use formwork_kernel::{routes, session};

/// Upper bound for handling one request, uploads included.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting Formwork");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        port = config.port,
        developer = config.debug_developer,
        "Configuration loaded"
    );

    let state = AppState::new(&config).context("failed to initialize application state")?;

    let session_layer =
        session::create_session_layer(session::parse_same_site(&config.cookie_same_site));

    // Middleware layers (last added = first executed in request flow):
    // TraceLayer → timeout → session → body limit → routes
    let app = routes::router()
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(session_layer)
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind to address")?;

    info!(%addr, "Server listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
