//! API server for starting and polling self-healing CI runs.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use healer::config::load_config;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "healer-api")]
#[command(about = "HTTP API for the self-healing CI pipeline agent")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8090")]
    port: u16,

    /// Optional TOML config file
    #[arg(long, default_value = "healer.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    healer::logging::init("info");

    let args = Args::parse();
    let config = load_config(&args.config)?;
    let state = AppState::new(config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", axum::routing::get(|| async { "ok" }))
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .context("parse bind address")?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;
    axum::serve(listener, app).await.context("serve")?;
    Ok(())
}
