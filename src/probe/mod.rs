//! Readiness probes for the backing services.
//!
//! A [`Probe`] performs one minimal operation that proves a dependency is usable.
//! Driver errors are classified into [`ProbeErrorKind`] inside each variant; callers
//! only ever see a [`ProbeFailure`]. [`attempt`] wraps a probe with a hard deadline
//! and turns the outcome into a [`ProbeResult`].

#[cfg(feature = "broker-nats")]
pub mod nats;
#[cfg(feature = "db-postgres")]
pub mod postgres;
#[cfg(feature = "stream-pulsar")]
pub mod pulsar;
#[cfg(feature = "db-redis")]
pub mod redis;

use crate::config::Settings;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyKind {
    Broker,
    StreamPlatform,
    Sql,
    KvStore,
}

impl DependencyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DependencyKind::Broker => "broker",
            DependencyKind::StreamPlatform => "stream-platform",
            DependencyKind::Sql => "sql",
            DependencyKind::KvStore => "kv-store",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, kind-tagged dependency. Targets are already redacted for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencyDescriptor {
    pub name: String,
    pub kind: DependencyKind,
    pub targets: Vec<String>,
}

impl DependencyDescriptor {
    pub fn new(name: impl Into<String>, kind: DependencyKind, targets: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            targets,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProbeErrorKind {
    Unreachable,
    AuthFailure,
    Timeout,
    ProtocolError,
}

impl ProbeErrorKind {
    pub const ALL: [ProbeErrorKind; 4] = [
        ProbeErrorKind::Unreachable,
        ProbeErrorKind::AuthFailure,
        ProbeErrorKind::Timeout,
        ProbeErrorKind::ProtocolError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeErrorKind::Unreachable => "unreachable",
            ProbeErrorKind::AuthFailure => "auth-failure",
            ProbeErrorKind::Timeout => "timeout",
            ProbeErrorKind::ProtocolError => "protocol-error",
        }
    }
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified probe failure. The detail is for operators and never carries credentials.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct ProbeFailure {
    pub kind: ProbeErrorKind,
    pub detail: String,
}

impl ProbeFailure {
    pub fn new(kind: ProbeErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn unreachable(detail: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Unreachable, detail)
    }

    pub fn auth(detail: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::AuthFailure, detail)
    }

    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Timeout, detail)
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::ProtocolError, detail)
    }
}

/// Outcome of a single attempt against one dependency.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeResult {
    pub dependency: String,
    pub attempt: u32,
    pub success: bool,
    pub latency: Duration,
    pub error: Option<ProbeErrorKind>,
    pub detail: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ProbeResult {
    pub fn success(dependency: impl Into<String>, attempt: u32, latency: Duration) -> Self {
        Self {
            dependency: dependency.into(),
            attempt,
            success: true,
            latency,
            error: None,
            detail: None,
            checked_at: Utc::now(),
        }
    }

    pub fn failure(
        dependency: impl Into<String>,
        attempt: u32,
        latency: Duration,
        failure: ProbeFailure,
    ) -> Self {
        Self {
            dependency: dependency.into(),
            attempt,
            success: false,
            latency,
            error: Some(failure.kind),
            detail: Some(failure.detail),
            checked_at: Utc::now(),
        }
    }

    pub fn latency_ms(&self) -> u64 {
        std::cmp::min(self.latency.as_millis(), u128::from(u64::MAX)) as u64
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    fn descriptor(&self) -> &DependencyDescriptor;

    /// Runs one readiness check. Implementations should size their own driver timeouts
    /// from `timeout`; [`attempt`] enforces it regardless.
    async fn check(&self, timeout: Duration) -> std::result::Result<(), ProbeFailure>;
}

pub type SharedProbe = Arc<dyn Probe>;

/// Runs `probe` once, bounded by `timeout`, and records the outcome as attempt `attempt`.
pub async fn attempt(probe: &dyn Probe, attempt: u32, timeout: Duration) -> ProbeResult {
    let name = probe.descriptor().name.clone();
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, probe.check(timeout)).await;
    let latency = started.elapsed();

    match outcome {
        Ok(Ok(())) => ProbeResult::success(name, attempt, latency),
        Ok(Err(failure)) => ProbeResult::failure(name, attempt, latency, failure),
        Err(_) => ProbeResult::failure(
            name,
            attempt,
            latency,
            ProbeFailure::timeout(format!(
                "no response within {}",
                humantime::format_duration(timeout)
            )),
        ),
    }
}

/// Builds one probe per enabled dependency block.
pub fn build_probes(settings: &Settings) -> Result<Vec<SharedProbe>> {
    let mut probes: Vec<SharedProbe> = Vec::new();

    for descriptor in settings.dependencies() {
        let probe: SharedProbe = match descriptor.kind {
            DependencyKind::Broker => broker_probe(settings, descriptor)?,
            DependencyKind::StreamPlatform => stream_probe(settings, descriptor)?,
            DependencyKind::Sql => sql_probe(settings, descriptor)?,
            DependencyKind::KvStore => kv_probe(settings, descriptor)?,
        };
        probes.push(probe);
    }

    Ok(probes)
}

#[cfg(feature = "broker-nats")]
fn broker_probe(settings: &Settings, descriptor: DependencyDescriptor) -> Result<SharedProbe> {
    let broker = settings
        .broker
        .as_ref()
        .ok_or_else(|| crate::err!("broker descriptor without broker settings"))?;
    Ok(Arc::new(nats::NatsProbe::new(descriptor, broker)))
}

#[cfg(not(feature = "broker-nats"))]
fn broker_probe(_: &Settings, descriptor: DependencyDescriptor) -> Result<SharedProbe> {
    crate::bail_err!(
        "dependency `{}` requires the `broker-nats` feature (or set broker.enabled=false)",
        descriptor.name
    )
}

#[cfg(feature = "stream-pulsar")]
fn stream_probe(settings: &Settings, descriptor: DependencyDescriptor) -> Result<SharedProbe> {
    let stream = settings
        .stream
        .as_ref()
        .ok_or_else(|| crate::err!("stream descriptor without stream settings"))?;
    Ok(Arc::new(pulsar::PulsarAdminProbe::new(descriptor, stream)?))
}

#[cfg(not(feature = "stream-pulsar"))]
fn stream_probe(_: &Settings, descriptor: DependencyDescriptor) -> Result<SharedProbe> {
    crate::bail_err!(
        "dependency `{}` requires the `stream-pulsar` feature (or set stream.enabled=false)",
        descriptor.name
    )
}

#[cfg(feature = "db-postgres")]
fn sql_probe(settings: &Settings, descriptor: DependencyDescriptor) -> Result<SharedProbe> {
    let sql = settings
        .sql
        .as_ref()
        .ok_or_else(|| crate::err!("sql descriptor without sql settings"))?;
    Ok(Arc::new(postgres::PostgresProbe::new(
        descriptor,
        sql,
        settings.bootstrap.probe_timeout,
    )))
}

#[cfg(not(feature = "db-postgres"))]
fn sql_probe(_: &Settings, descriptor: DependencyDescriptor) -> Result<SharedProbe> {
    crate::bail_err!(
        "dependency `{}` requires the `db-postgres` feature (or set sql.enabled=false)",
        descriptor.name
    )
}

#[cfg(feature = "db-redis")]
fn kv_probe(settings: &Settings, descriptor: DependencyDescriptor) -> Result<SharedProbe> {
    let kv = settings
        .kv
        .as_ref()
        .ok_or_else(|| crate::err!("kv descriptor without kv settings"))?;
    Ok(Arc::new(redis::RedisProbe::new(descriptor, kv)?))
}

#[cfg(not(feature = "db-redis"))]
fn kv_probe(_: &Settings, descriptor: DependencyDescriptor) -> Result<SharedProbe> {
    crate::bail_err!(
        "dependency `{}` requires the `db-redis` feature (or set kv.enabled=false)",
        descriptor.name
    )
}
