use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use relay_server::config::{generate_config_template, Config};
use relay_server::store::MemoryMessageStore;
use relay_server::{routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(env_filter()).init();
    }

    tracing::info!("relay server v{} starting", env!("CARGO_PKG_VERSION"));

    let store = MemoryMessageStore::with_retention(config.message_retention());
    let app_state = state::AppState::new(&config, Arc::new(store));

    if app_state.jwt_secret.is_none() {
        tracing::warn!("No jwt_secret configured, WebSocket connections are NOT authenticated");
    }
    if app_state.internal_token.is_none() {
        tracing::warn!("No internal_token configured, /internal hooks are open");
    }
    tracing::info!(
        typing_timeout_ms = config.typing_timeout_ms,
        ping_interval_secs = config.ping_interval_secs,
        pong_timeout_secs = config.pong_timeout_secs,
        ring_timeout_secs = config.ring_timeout_secs,
        message_retention_secs = config.message_retention_secs,
        "Realtime settings"
    );

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
