use super::{DependencyDescriptor, Probe, ProbeFailure};
use crate::config::{redact_url, BrokerSettings};
use async_nats::{ConnectErrorKind, ConnectOptions};
use async_trait::async_trait;
use std::time::Duration;

/// Opens a fresh broker connection and flushes it, which waits for a PING/PONG round trip.
pub struct NatsProbe {
    descriptor: DependencyDescriptor,
    url: String,
    display_url: String,
}

impl NatsProbe {
    pub fn new(descriptor: DependencyDescriptor, settings: &BrokerSettings) -> Self {
        Self {
            descriptor,
            url: settings.url.to_string(),
            display_url: redact_url(&settings.url),
        }
    }
}

#[async_trait]
impl Probe for NatsProbe {
    fn descriptor(&self) -> &DependencyDescriptor {
        &self.descriptor
    }

    async fn check(&self, timeout: Duration) -> Result<(), ProbeFailure> {
        let client = ConnectOptions::new()
            .name("readygate-probe")
            .connection_timeout(timeout)
            .connect(self.url.as_str())
            .await
            .map_err(|err| classify_connect_error(err.kind(), &self.display_url, &err))?;

        let flushed = client.flush().await;
        drop(client);

        flushed.map_err(|err| {
            ProbeFailure::unreachable(format!(
                "broker {} did not answer the round trip: {err}",
                self.display_url
            ))
        })
    }
}

fn classify_connect_error(
    kind: ConnectErrorKind,
    target: &str,
    err: &dyn std::fmt::Display,
) -> ProbeFailure {
    let detail = format!("connect to {target} failed: {err}");
    match kind {
        ConnectErrorKind::Authentication | ConnectErrorKind::AuthorizationViolation => {
            ProbeFailure::auth(detail)
        }
        ConnectErrorKind::TimedOut => ProbeFailure::timeout(detail),
        ConnectErrorKind::Dns | ConnectErrorKind::Io | ConnectErrorKind::MaxReconnects => {
            ProbeFailure::unreachable(detail)
        }
        _ => ProbeFailure::protocol(detail),
    }
}
