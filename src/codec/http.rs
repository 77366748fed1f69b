#![forbid(unsafe_code)]

use crate::readiness::{DependencySnapshot, HealthSnapshot, OverallStatus};
use chrono::SecondsFormat;
use serde_json::{json, Value as JsonValue};

/// `GET /` body: service identity and overall status.
pub fn service_payload(service: &str, status: OverallStatus) -> JsonValue {
    json!({
        "service": service,
        "status": status.as_str(),
    })
}

/// `GET /health` body.
pub fn liveness_payload(status: OverallStatus) -> JsonValue {
    json!({ "status": status.as_str() })
}

/// `GET /health/deep` body, also returned by `GET /ready`.
pub fn deep_health_payload(snapshot: &HealthSnapshot) -> JsonValue {
    json!({
        "status": snapshot.status.as_str(),
        "dependencies": snapshot
            .dependencies
            .iter()
            .map(dependency_payload)
            .collect::<Vec<_>>(),
    })
}

fn dependency_payload(dependency: &DependencySnapshot) -> JsonValue {
    let last = dependency.last.as_ref();
    json!({
        "name": dependency.name,
        "kind": dependency.kind.as_str(),
        "success": dependency.success(),
        "latency_ms": dependency.latency_ms(),
        "error": dependency.error().map(|kind| kind.as_str()),
        "attempt": dependency.attempt(),
        "consecutive_failures": dependency.consecutive_failures,
        "target": dependency.targets.join(", "),
        "checked_at": last.map(|result| result.checked_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        "detail": last.and_then(|result| result.detail.as_deref()),
    })
}
