//! Parley relay binary.
//!
//! Loads `.env.local`/`.env`, resolves configuration, and serves the relay
//! with structured logging and graceful shutdown on SIGTERM/SIGINT.

use parley_server::{app, background, config, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    // Variables already set win; .env.local wins over .env.
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::dotenv();

    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the relay cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let upstream = &config.upstream;
    let agent = if upstream.agent_name.is_empty() {
        "<unset>"
    } else {
        upstream.agent_name.as_str()
    };
    tracing::info!(
        local = upstream.is_local(),
        agent,
        has_api_key = upstream.bearer_token().is_some(),
        port = config.server.port,
        "upstream configuration"
    );
    if !upstream.is_local() && upstream.agent_name.is_empty() {
        tracing::warn!(
            "upstream.agent_name is not set; cloud mode needs it (set PARLEY_AGENT_NAME or configure a local upstream)"
        );
    }

    let state = AppState::from_config(&config).expect("failed to build upstream HTTP client");

    tokio::spawn(background::start_sweep_task(
        Arc::new(state.clone()),
        config.relay.sweep_interval(),
    ));

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting parley relay");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("parley relay shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
