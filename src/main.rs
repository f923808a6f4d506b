mod config;
mod context;
mod error;
mod limiter;
mod middleware;
mod policy;
mod service;
mod storage;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    routing::any,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::{config::LimiterConfig, service::Service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = LimiterConfig::from_env().context("failed to build limiter config")?;
    let bind_addr = cfg.bind_addr;

    let service = Arc::new(Service::from_config(cfg).await?);

    let app = Router::new().fallback(any(root_handler)).with_state(service);

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("failed to bind listener")?;

    tracing::info!(addr = %bind_addr, "rate limiter listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("server error")?;

    Ok(())
}

async fn root_handler(
    State(service): State<Arc<Service>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> axum::response::Response {
    service.handle_http(request, Some(addr)).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
