pub mod api;
pub mod dtos;
pub mod error;
pub mod extractors;
pub mod services;
pub mod utils;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{Extension, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{AppConfig, ProfileConfig};
use api::ProxyController;
use services::ProxyServices;

pub struct ApplicationServer;

impl ApplicationServer {
    /// the whole http surface, split out so tests can drive it without binding a port
    pub fn router(services: ProxyServices) -> Router {
        let path = services.config.proxy_path.clone();

        ProxyController::app(&path)
            .layer(Extension(services))
            .layer(TraceLayer::new_for_http())
    }

    pub async fn serve(config: Arc<AppConfig>, profiles: ProfileConfig) -> anyhow::Result<()> {
        let services = ProxyServices::new(config.clone(), profiles)
            .context("failed to build proxy services")?;

        let router = Self::router(services);

        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;

        info!(
            "proxy listening on {} (resource endpoint {})",
            addr, config.proxy_path
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(Self::shutdown_signal())
            .await
            .context("error while serving")?;

        info!("proxy shut down");
        Ok(())
    }

    async fn shutdown_signal() {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for shutdown signal: {}", e);
        }
    }
}
