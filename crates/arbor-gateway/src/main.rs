use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod anthropic;
mod app;
mod health;
mod ws;

/// Project OS gateway: HTTP health + WebSocket chat over the turn pipeline.
#[derive(Debug, Parser)]
#[command(name = "arbor-gateway", version)]
struct Args {
    /// Path to arbor.toml (default: ~/.arbor/arbor.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arbor_gateway=info,arbor_pipeline=info,tower_http=warn".into()),
        )
        .init();

    let args = Args::parse();
    let config = arbor_core::config::ArborConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({e}), using defaults");
        arbor_core::config::ArborConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config)?);
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("Arbor gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
