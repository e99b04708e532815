//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Collect route registrations before serving
//! - Build the Axum router around the single dispatch entry point
//! - Wire up middleware (tracing, request ID, CORS headers)
//! - Bind the listener and serve until the process exits

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::http::context::RequestContext;
use crate::http::cors;
use crate::http::dispatcher::{dispatch, Dispatcher};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::sse::SseSession;
use crate::http::stream::{Blob, UploadStream};
use crate::routing::{Route, RouteRegistry};

/// HTTP server with a registry of RPC, SSE, Blob and Upload routes.
///
/// `C` is the application context: built once, shared read-only with every
/// request through [`RequestContext::app`].
pub struct Server<C> {
    config: ServerConfig,
    routes: RouteRegistry<C>,
    app: Arc<C>,
}

impl<C> Server<C>
where
    C: Send + Sync + 'static,
{
    /// Create a server with the given configuration and application context.
    pub fn new(config: ServerConfig, app: C) -> Self {
        Self {
            config,
            routes: RouteRegistry::new(),
            app: Arc::new(app),
        }
    }

    /// Register a prepared route. Replaces any route already at `path`.
    pub fn route(mut self, path: impl Into<String>, route: Route<C>) -> Self {
        self.routes.register(path, route);
        self
    }

    /// POST route; `Some(value)` is answered as JSON, `None` with an empty body.
    pub fn rpc<F, Fut, T>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RequestContext<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<T>>> + Send + 'static,
        T: Serialize,
    {
        self.route(path, Route::rpc(handler))
    }

    /// GET route answered with `text/event-stream`.
    pub fn sse<F, Fut>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(SseSession<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(path, Route::sse(handler))
    }

    /// GET route answered with raw bytes, buffered or streamed.
    pub fn blob<F, Fut, B>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RequestContext<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B>> + Send + 'static,
        B: Into<Blob>,
    {
        self.route(path, Route::blob(handler))
    }

    /// POST route whose handler consumes the raw request stream.
    pub fn upload<F, Fut>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RequestContext<C>, UploadStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(path, Route::upload(handler))
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Freeze the routes and build the Axum router with all middleware layers.
    pub fn into_router(self) -> Router {
        tracing::debug!(routes = self.routes.len(), "Building router");

        let dispatcher = Arc::new(Dispatcher {
            routes: self.routes,
            app: self.app,
            max_request_size: self.config.limits.max_request_size,
            cors_enabled: self.config.cors.is_some(),
        });

        let mut router = Router::new()
            .fallback(dispatch::<C>)
            .with_state(dispatcher);

        if let Some(cors_config) = &self.config.cors {
            router = cors::apply(router, cors_config);
        }

        router
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.routes.len(),
            max_request_size = self.config.limits.max_request_size,
            cors = self.config.cors.is_some(),
            "HTTP server starting"
        );

        axum::serve(listener, self.into_router()).await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Bind `0.0.0.0:port` and serve.
    pub async fn listen(self, port: u16) -> Result<(), std::io::Error> {
        self.listen_with(port, |_| {}).await
    }

    /// Bind `0.0.0.0:port`, report the bound address to `on_ready`, then serve.
    pub async fn listen_with<F>(self, port: u16, on_ready: F) -> Result<(), std::io::Error>
    where
        F: FnOnce(SocketAddr),
    {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        on_ready(listener.local_addr()?);
        self.serve(listener).await
    }

    /// Bind `listener.bind_address` from the config, report it, then serve.
    pub async fn listen_configured<F>(self, on_ready: F) -> Result<(), std::io::Error>
    where
        F: FnOnce(SocketAddr),
    {
        let listener = TcpListener::bind(&self.config.listener.bind_address).await?;
        on_ready(listener.local_addr()?);
        self.serve(listener).await
    }
}
