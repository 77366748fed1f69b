//! Request middleware, applied to every route in one fixed order:
//! panic recovery wraps trace-context propagation, which wraps request logging.

use crate::metrics::metrics;
use axum::extract::{ConnectInfo, MatchedPath, Request};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::FutureExt;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, TraceContextExt, TraceFlags, TraceState};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use serde_json::json;
use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use tokio::time::Instant;
use tracing::Instrument;

pub const TRACEPARENT: &str = "traceparent";

const UNMATCHED_ROUTE: &str = "unmatched";

/// Reads the W3C trace context from `headers`. Missing or malformed headers yield an
/// invalid (empty) span context.
pub fn extract_span_context(headers: &HeaderMap) -> SpanContext {
    let parent = TraceContextPropagator::new().extract(&HeaderExtractor(headers));
    parent.span().span_context().clone()
}

/// The span this service answers under: same trace as `parent` when it is valid,
/// otherwise a fresh sampled trace.
pub fn child_span_context(parent: &SpanContext) -> SpanContext {
    let ids = RandomIdGenerator::default();
    if parent.is_valid() {
        SpanContext::new(
            parent.trace_id(),
            ids.new_span_id(),
            parent.trace_flags(),
            false,
            parent.trace_state().clone(),
        )
    } else {
        SpanContext::new(
            ids.new_trace_id(),
            ids.new_span_id(),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        )
    }
}

/// Writes `traceparent` (and `tracestate`) for `span_context` into `headers`.
pub fn inject_span_context(span_context: &SpanContext, headers: &mut HeaderMap) {
    let context = Context::new().with_remote_span_context(span_context.clone());
    TraceContextPropagator::new().inject_context(&context, &mut HeaderInjector(headers));
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
    }
}

fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string())
}

/// Converts a handler panic into a 500 and keeps the process serving.
pub async fn recover(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = route_label(&request);
    let started = Instant::now();

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let elapsed = started.elapsed();
            let counters = metrics();
            counters.record_http_panic();
            counters.record_http_request(
                &route,
                StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                elapsed,
            );
            tracing::error!(
                method = %method,
                path = %path,
                panic = %panic_message(panic.as_ref()),
                "request handler panicked"
            );

            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal server error" })),
            )
                .into_response()
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Reads or creates the trace context, exposes it to inner layers and echoes it back.
pub async fn trace_context(mut request: Request, next: Next) -> Response {
    let span_context = child_span_context(&extract_span_context(request.headers()));

    let span = tracing::info_span!(
        "http_request",
        trace_id = %span_context.trace_id()
    );
    request.extensions_mut().insert(span_context.clone());

    let mut response = next.run(request).instrument(span).await;
    inject_span_context(&span_context, response.headers_mut());
    response
}

/// One structured line per request, plus request count and duration observations.
pub async fn request_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = route_label(&request);
    let caller = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());
    let trace_id = request
        .extensions()
        .get::<SpanContext>()
        .map(|context| context.trace_id().to_string())
        .unwrap_or_else(|| "-".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    let elapsed = started.elapsed();
    let status = response.status();
    metrics().record_http_request(&route, status.as_u16(), elapsed);

    let duration_ms = std::cmp::min(elapsed.as_millis(), u128::from(u64::MAX)) as u64;
    if status.is_server_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms,
            caller = %caller,
            trace_id = %trace_id,
            "http request"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms,
            caller = %caller,
            trace_id = %trace_id,
            "http request"
        );
    }

    response
}
