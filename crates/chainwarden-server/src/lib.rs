//! Chainwarden Server - ingress HTTP server.
//!
//! The ingress server is the daemon's control plane. The proxy reports
//! blocked packages to it and the desktop UI reads events and files bypass
//! requests through it. It binds an ephemeral loopback port; the resolved
//! address is handed to the proxy as its reporting endpoint.
//!
//! ## Endpoints
//!
//! - `POST /block` - Block report from the proxy
//! - `GET /ping` - Liveness probe
//! - `GET /v1/events` - All blocked events (UI token)
//! - `GET /v1/events/{id}` - One blocked event (UI token)
//! - `POST /v1/events/{id}/request-access` - Bypass request (UI token)

pub mod error;
mod handlers;
pub mod models;
pub mod notifier;
pub mod state;
pub mod store;

use std::net::SocketAddr;

use axum::routing::{get, post};
use axum::Router;
use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::{ApiError, Result};
pub use models::{BlockEvent, BlockedEvent};
pub use notifier::{UiLink, UiNotifier};
pub use state::AppState;
pub use store::EventStore;

/// Loopback with an OS-assigned port.
pub const DEFAULT_BIND: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 0);

/// Ingress server configuration.
#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub bind: SocketAddr,
    /// Require the UI bearer token on `/v1/*` routes.
    pub require_ui_token: bool,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND,
            require_ui_token: true,
        }
    }
}

impl IngressConfig {
    pub fn with_require_ui_token(mut self, require: bool) -> Self {
        self.require_ui_token = require;
        self
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind to {0}: {1}")]
    BindError(SocketAddr, std::io::Error),

    /// Server runtime error.
    #[error("server error: {0}")]
    Runtime(String),

    /// The UI notification client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// The ingress HTTP server.
pub struct IngressServer {
    router: Router,
    store: EventStore,
    bind: SocketAddr,
    addr: RwLock<Option<SocketAddr>>,
    shutdown: CancellationToken,
}

impl IngressServer {
    /// Creates a server relaying blocks through `notifier`.
    pub fn new(config: IngressConfig, notifier: UiNotifier) -> Self {
        let store = EventStore::new();
        let state = AppState::new(store.clone(), notifier, config.require_ui_token);

        Self {
            router: build_router(state),
            store,
            bind: config.bind,
            addr: RwLock::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    /// The bound address, once `start` has bound the listener.
    pub fn addr(&self) -> Option<SocketAddr> {
        *self.addr.read()
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Binds and serves until `cancel` fires or [`stop`](Self::stop) is called.
    pub async fn start(&self, cancel: CancellationToken) -> std::result::Result<(), ServerError> {
        let listener = bind(self.bind)?;
        let local = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(self.bind, e))?;
        *self.addr.write() = Some(local);
        info!("Ingress server listening on {}", local);

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = shutdown.cancelled() => {}
                }
            })
            .await
            .map_err(|e| ServerError::Runtime(e.to_string()))?;

        info!("Ingress server stopped");
        Ok(())
    }

    /// Signals the serve loop to shut down. Safe to call more than once.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/block", post(handlers::report_block))
        .route("/ping", get(handlers::ping))
        .route("/v1/events", get(handlers::list_events))
        .route("/v1/events/{id}", get(handlers::get_event))
        .route(
            "/v1/events/{id}/request-access",
            post(handlers::request_access),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds with `SO_REUSEADDR` so a restart is not blocked by lingering sockets.
fn bind(addr: SocketAddr) -> std::result::Result<tokio::net::TcpListener, ServerError> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| ServerError::BindError(addr, e))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| ServerError::BindError(addr, e))?;
    socket
        .bind(&addr.into())
        .map_err(|e| ServerError::BindError(addr, e))?;
    socket
        .listen(128)
        .map_err(|e| ServerError::BindError(addr, e))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| ServerError::BindError(addr, e))?;

    let std_listener: std::net::TcpListener = socket.into();
    tokio::net::TcpListener::from_std(std_listener).map_err(|e| ServerError::BindError(addr, e))
}
