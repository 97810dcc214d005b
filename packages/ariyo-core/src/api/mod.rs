//! HTTP API layer: the same-origin audio proxy and a liveness route.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::config::ProxyConfig;
use crate::protocol_constants::USER_AGENT;

pub mod http;
pub mod proxy;
pub mod response;

pub use http::create_router;
pub use proxy::ProxyError;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind or serve on the TCP listener.
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),

    /// Proxy settings failed validation.
    #[error("Invalid proxy configuration: {0}")]
    Config(String),

    #[error("Failed to build upstream HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Shared state for the API handlers.
#[derive(Clone)]
pub struct ProxyState {
    /// Upstream client. No total timeout: proxied streams are long-lived.
    pub client: reqwest::Client,
    pub config: Arc<ProxyConfig>,
}

impl ProxyState {
    /// Validates `config` and builds the upstream client.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        config.validate().map_err(ServerError::Config)?;
        // Redirects are followed by the handler so every hop is screened.
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }
}

/// Binds `addr` and serves the API until `shutdown` resolves.
pub async fn start_server(
    addr: SocketAddr,
    state: ProxyState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local = listener.local_addr()?;

    log::info!("Server listening on http://{}", local);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    log::info!("Server stopped");
    Ok(())
}
