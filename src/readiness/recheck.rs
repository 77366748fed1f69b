use crate::config::BootstrapSettings;
use crate::metrics::{metrics, ProbePhase};
use crate::probe::{self, SharedProbe};
use crate::probe_event;
use crate::readiness::HealthState;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const RECHECK_ATTEMPT: u32 = 1;

/// Background re-probing after bootstrap: one task per dependency on a fixed interval.
///
/// A recheck is a single attempt. Failures are recorded and wait for the next tick; they
/// never fall back into the exponential startup cadence.
pub struct RecheckLoop {
    interval: Duration,
    probe_timeout: Duration,
    probes: Vec<SharedProbe>,
    health: HealthState,
}

impl RecheckLoop {
    pub fn new(settings: &BootstrapSettings, probes: Vec<SharedProbe>, health: HealthState) -> Self {
        Self {
            interval: settings.recheck_interval,
            probe_timeout: settings.probe_timeout,
            probes,
            health,
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        for probe in self.probes {
            tasks.spawn(recheck_dependency(
                probe,
                self.interval,
                self.probe_timeout,
                self.health.clone(),
                shutdown.clone(),
            ));
        }
        tracing::info!(
            dependencies = tasks.len(),
            interval_ms = super::bootstrap::duration_ms(self.interval),
            "background rechecks started"
        );
        tasks
    }
}

async fn recheck_dependency(
    probe: SharedProbe,
    interval: Duration,
    probe_timeout: Duration,
    health: HealthState,
    shutdown: CancellationToken,
) {
    let descriptor = probe.descriptor().clone();
    let mut previous_success: Option<bool> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(interval) => {}
        }

        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = probe::attempt(probe.as_ref(), RECHECK_ATTEMPT, probe_timeout) => result,
        };
        metrics().record_probe_attempt(descriptor.kind, &result, ProbePhase::Recheck);

        let success = result.success;
        match (previous_success, success) {
            (Some(true), false) | (None, false) => probe_event!(
                warn,
                "recheck failed",
                dependency = descriptor.name,
                kind = descriptor.kind,
                error = result.error.map(|kind| kind.as_str()).unwrap_or("none"),
                detail = result.detail.as_deref().unwrap_or(""),
            ),
            (Some(false), true) => probe_event!(
                info,
                "dependency recovered",
                dependency = descriptor.name,
                kind = descriptor.kind,
                latency_ms = result.latency_ms(),
            ),
            _ => probe_event!(
                debug,
                "recheck completed",
                dependency = descriptor.name,
                kind = descriptor.kind,
                success = success,
                latency_ms = result.latency_ms(),
            ),
        }
        previous_success = Some(success);

        if let Err(err) = health.record_result(result).await {
            tracing::warn!(
                dependency = %descriptor.name,
                error = %err,
                "failed to record recheck result"
            );
        }
    }

    probe_event!(
        debug,
        "recheck loop stopped",
        dependency = descriptor.name,
        kind = descriptor.kind,
    );
}
