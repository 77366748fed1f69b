use crate::metrics::metrics;
use crate::probe::{DependencyDescriptor, ProbeResult};
use crate::readiness::{HealthSnapshot, HealthStateMachine, OverallStatus, TransitionError};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared handle to the process health state.
///
/// Cloning is cheap; every clone points at the same lock. Writers are the bootstrap
/// orchestrator and the re-check loops, readers are the HTTP handlers.
#[derive(Clone)]
pub struct HealthState {
    machine: Arc<RwLock<HealthStateMachine>>,
}

impl HealthState {
    pub fn new(dependencies: impl IntoIterator<Item = DependencyDescriptor>) -> Self {
        let counters = metrics();
        let dependencies: Vec<_> = dependencies.into_iter().collect();
        for descriptor in &dependencies {
            counters.register_dependency(&descriptor.name, descriptor.kind);
        }
        let machine = HealthStateMachine::new(dependencies);
        Self {
            machine: Arc::new(RwLock::new(machine)),
        }
    }

    pub async fn snapshot(&self) -> HealthSnapshot {
        let guard = self.machine.read().await;
        guard.snapshot()
    }

    pub async fn overall_status(&self) -> OverallStatus {
        let guard = self.machine.read().await;
        guard.status()
    }

    pub async fn record_result(
        &self,
        result: ProbeResult,
    ) -> Result<OverallStatus, TransitionError> {
        let dependency = result.dependency.clone();
        let mut guard = self.machine.write().await;
        let previous = guard.status();
        let outcome = guard.record_result(result);
        drop(guard);

        if let Ok(current) = outcome {
            log_transition(previous, current, Some(&dependency), "probe_result");
        }
        outcome
    }

    pub async fn complete_bootstrap(&self) -> Result<OverallStatus, TransitionError> {
        self.apply(HealthStateMachine::complete_bootstrap, "bootstrap_complete")
            .await
    }

    pub async fn mark_bootstrap_timed_out(&self) -> Result<OverallStatus, TransitionError> {
        self.apply(HealthStateMachine::mark_bootstrap_timed_out, "bootstrap_timeout")
            .await
    }

    async fn apply(
        &self,
        transition: fn(&mut HealthStateMachine) -> Result<OverallStatus, TransitionError>,
        reason: &'static str,
    ) -> Result<OverallStatus, TransitionError> {
        let mut guard = self.machine.write().await;
        let previous = guard.status();
        let outcome = transition(&mut guard);
        drop(guard);

        if let Ok(current) = outcome {
            log_transition(previous, current, None, reason);
        }
        outcome
    }
}

fn log_transition(
    from: OverallStatus,
    to: OverallStatus,
    dependency: Option<&str>,
    reason: &'static str,
) {
    if from == to {
        return;
    }
    let dependency = dependency.unwrap_or("-");
    match to {
        OverallStatus::Degraded | OverallStatus::Failed => tracing::warn!(
            dependency,
            state_from = from.as_str(),
            state_to = to.as_str(),
            reason,
            "health state transition"
        ),
        _ => tracing::info!(
            dependency,
            state_from = from.as_str(),
            state_to = to.as_str(),
            reason,
            "health state transition"
        ),
    }
}
