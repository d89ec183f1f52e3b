/// API Server implementation

use super::handlers::*;
use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;

/// HTTP server answering LNURL-pay requests behind the onion service
pub struct ApiServer {
    listen_addr: SocketAddr,
    state: AppState,
}

impl ApiServer {
    pub fn new(listen_addr: SocketAddr, state: AppState) -> Self {
        Self { listen_addr, state }
    }

    /// Build the router with all endpoints
    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/", get(info_page))
            .route("/health", get(health_check))
            .route("/.well-known/lnurlp/:username", get(pay_request))
            // Path published by earlier releases
            .route("/.wellknown/lnurlp/:username", get(pay_request))
            // Wallets running in browsers fetch cross-origin
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Start the API server
    pub async fn start(self) -> Result<()> {
        let app = Self::router(self.state);

        info!("API server starting on {}", self.listen_addr);

        let listener = tokio::net::TcpListener::bind(self.listen_addr).await?;

        axum::serve(listener, app)
            .await
            .map_err(|e| anyhow::anyhow!("API server error: {}", e))?;

        Ok(())
    }
}
