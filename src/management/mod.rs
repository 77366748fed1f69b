pub mod middleware;

use crate::app_state::AppState;
use crate::codec::http::{deep_health_payload, liveness_payload, service_payload};
use crate::config::ServerSettings;
use crate::error::{Context, Result};
use crate::metrics::render_prometheus;
use axum::http::{
    header::{CONTENT_TYPE, RETRY_AFTER},
    HeaderValue, StatusCode,
};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware::from_fn, Extension, Json, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};

pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub struct ManagementServer {
    addr: SocketAddr,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl ManagementServer {
    pub fn build(settings: &ServerSettings) -> Self {
        Self {
            addr: SocketAddr::new(settings.host, settings.port),
            read_timeout: settings.read_timeout,
            write_timeout: settings.write_timeout,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Binds the listener up front so callers learn about port conflicts before serving.
    pub async fn bind(self) -> Result<BoundManagementServer> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind management listener on {}", self.addr))?;
        Ok(BoundManagementServer {
            listener,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
        })
    }

    pub async fn serve(self, state: AppState, shutdown: CancellationToken) -> Result<()> {
        self.bind().await?.serve(state, shutdown).await
    }
}

pub struct BoundManagementServer {
    listener: TcpListener,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl BoundManagementServer {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("management listener has no local address")
    }

    /// Serves until `shutdown` fires, then stops accepting and drains in-flight requests.
    pub async fn serve(self, state: AppState, shutdown: CancellationToken) -> Result<()> {
        let addr = self.local_addr()?;
        let app = router(state, self.read_timeout, self.write_timeout);

        tracing::info!(addr = %addr, "management server listening");

        axum::serve(
            self.listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .context("management server exited abnormally")?;

        tracing::info!(addr = %addr, "management server stopped");
        Ok(())
    }
}

/// Builds the management router: every endpoint behind the shared middleware stack.
pub fn router(state: AppState, read_timeout: Duration, write_timeout: Duration) -> Router {
    let routes = Router::new()
        .route("/", get(identity))
        .route("/health", get(liveness))
        .route("/health/deep", get(deep_health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics));

    with_middleware(routes, read_timeout, write_timeout).layer(Extension(state))
}

/// Wraps `routes` in the fixed middleware order.
///
/// Layers added last wrap outermost, so panic recovery sees everything and the
/// timeouts sit closest to the handlers.
pub fn with_middleware(routes: Router, read_timeout: Duration, write_timeout: Duration) -> Router {
    routes
        .layer(TimeoutLayer::new(write_timeout))
        .layer(RequestBodyTimeoutLayer::new(read_timeout))
        .layer(from_fn(middleware::request_log))
        .layer(from_fn(middleware::trace_context))
        .layer(from_fn(middleware::recover))
}

async fn identity(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let status = state.health.overall_status().await;
    (
        StatusCode::OK,
        Json(service_payload(&state.service_name, status)),
    )
}

async fn liveness(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let status = state.health.overall_status().await;
    (StatusCode::OK, Json(liveness_payload(status)))
}

async fn deep_health(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let snapshot = state.health.snapshot().await;
    (StatusCode::OK, Json(deep_health_payload(&snapshot)))
}

async fn ready(Extension(state): Extension<AppState>) -> Response {
    let snapshot = state.health.snapshot().await;
    let payload = Json(deep_health_payload(&snapshot));

    if snapshot.is_ready() {
        return (StatusCode::OK, payload).into_response();
    }

    let mut response = (StatusCode::SERVICE_UNAVAILABLE, payload).into_response();
    if let Ok(value) = HeaderValue::from_str(&state.retry_after_secs.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}

async fn metrics(Extension(state): Extension<AppState>) -> Response {
    let snapshot = state.health.snapshot().await;
    (
        StatusCode::OK,
        [(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        render_prometheus(&snapshot),
    )
        .into_response()
}
