//! Bridge HTTP layer
//!
//! Thin handlers over the bridge state, a shared response module, request
//! extractors, and the middleware stack (request logging, optional auth,
//! CORS). The router and server lifecycle live here.

use std::net::SocketAddr;

use anyhow::Result;
use axum::Router;
use axum::routing::get;

use crate::bridge::SharedBridge;
use crate::catalog::service::cors_layer;

pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod responses;

pub use extractors::{RequestContext, resolve_base_url};

/// The bridge web server.
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
    state: SharedBridge,
}

impl WebServer {
    pub fn new(state: SharedBridge) -> Result<Self> {
        let addr: SocketAddr =
            format!("{}:{}", state.config.web.host, state.config.web.port).parse()?;
        let app = Self::router(state.clone());
        Ok(Self { app, addr, state })
    }

    /// The full bridge router with middleware applied.
    pub fn router(state: SharedBridge) -> Router {
        Router::new()
            .route("/", get(handlers::root::unified_root))
            .route("/model", get(handlers::root::unified_model))
            .route("/capabilities", get(handlers::root::unified_capabilities))
            .route("/export", get(handlers::root::export))
            .route("/health", get(handlers::health::health))
            .route("/status", get(handlers::health::health))
            // Everything group-scoped is proxied to the owning downstream.
            .route("/{group_type}", get(handlers::proxy::proxy_group))
            .route(
                "/{group_type}/{*rest}",
                get(handlers::proxy::proxy_group_subtree),
            )
            .fallback(handlers::not_found)
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                middleware::auth_middleware,
            ))
            .layer(axum::middleware::from_fn(
                middleware::request_logging_middleware,
            ))
            .layer(cors_layer())
            .with_state(state)
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Bind and serve, signalling the bind outcome through `ready_signal`
    /// so the caller can sequence background services after the socket is
    /// actually listening. Shuts down gracefully when the bridge's
    /// cancellation token fires.
    pub async fn serve_with_signal(
        self,
        ready_signal: tokio::sync::oneshot::Sender<Result<()>>,
    ) -> Result<()> {
        match tokio::net::TcpListener::bind(&self.addr).await {
            Ok(listener) => {
                let _ = ready_signal.send(Ok(()));
                let cancel = self.state.cancel.clone();
                axum::serve(listener, self.app)
                    .with_graceful_shutdown(async move { cancel.cancelled().await })
                    .await?;
                Ok(())
            }
            Err(bind_error) => {
                let message = format!("failed to bind to {}: {bind_error}", self.addr);
                let _ = ready_signal.send(Err(anyhow::anyhow!("{message}")));
                Err(anyhow::anyhow!("{message}"))
            }
        }
    }
}
