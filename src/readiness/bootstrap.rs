use crate::config::BootstrapSettings;
use crate::metrics::{metrics, BootstrapState, ProbePhase};
use crate::probe::{self, DependencyKind, ProbeErrorKind, ProbeResult, SharedProbe};
use crate::probe_event;
use crate::readiness::{HealthSnapshot, HealthState};
use crate::retry::{RetryPolicy, RetrySchedule};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// A dependency that never succeeded before bootstrap gave up on it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutstandingDependency {
    pub name: String,
    pub kind: DependencyKind,
    pub attempts: u32,
    pub error: Option<ProbeErrorKind>,
    pub detail: Option<String>,
}

#[derive(Debug)]
pub enum BootstrapError {
    TimedOut {
        elapsed: Duration,
        outstanding: Vec<OutstandingDependency>,
    },
    Cancelled {
        elapsed: Duration,
    },
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapError::TimedOut {
                elapsed,
                outstanding,
            } => {
                writeln!(
                    f,
                    "bootstrap timed out after {} with {} outstanding dependenc{}",
                    humantime::format_duration(*elapsed),
                    outstanding.len(),
                    if outstanding.len() == 1 { "y" } else { "ies" }
                )?;
                for dependency in outstanding {
                    let error = dependency
                        .error
                        .map(ProbeErrorKind::as_str)
                        .unwrap_or("no result");
                    writeln!(
                        f,
                        "  {} [{}] (attempts: {}): {}",
                        dependency.name, dependency.kind, dependency.attempts, error
                    )?;
                }
                Ok(())
            }
            BootstrapError::Cancelled { elapsed } => write!(
                f,
                "bootstrap cancelled by shutdown after {}",
                humantime::format_duration(*elapsed)
            ),
        }
    }
}

impl std::error::Error for BootstrapError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoopOutcome {
    Succeeded,
    Exhausted,
    DeadlineReached,
}

/// Drives every probe through its own retry loop under one overall deadline.
pub struct BootstrapOrchestrator {
    settings: BootstrapSettings,
    probes: Vec<SharedProbe>,
    health: HealthState,
}

impl BootstrapOrchestrator {
    pub fn new(settings: BootstrapSettings, probes: Vec<SharedProbe>, health: HealthState) -> Self {
        Self {
            settings,
            probes,
            health,
        }
    }

    /// Returns once every dependency has succeeded at least once, or fails once the
    /// overall timeout elapses. Health state is updated after every attempt either way.
    pub async fn run(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<HealthSnapshot, BootstrapError> {
        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let policy = RetryPolicy::from_settings(&self.settings);
        let counters = metrics();
        counters.record_bootstrap_started();

        tracing::info!(
            dependencies = self.probes.len(),
            timeout_ms = duration_ms(self.settings.timeout),
            max_attempts = policy.max_attempts,
            "bootstrap started"
        );

        let mut loops = JoinSet::new();
        for probe in &self.probes {
            loops.spawn(retry_loop(
                probe.clone(),
                policy.schedule(),
                self.settings.probe_timeout,
                deadline,
                self.health.clone(),
            ));
        }

        let all_succeeded = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                loops.abort_all();
                let elapsed = started.elapsed();
                tracing::warn!(elapsed_ms = duration_ms(elapsed), "bootstrap cancelled by shutdown");
                return Err(BootstrapError::Cancelled { elapsed });
            }
            all_succeeded = join_loops(&mut loops) => all_succeeded,
        };

        if all_succeeded {
            return self.finish_ready(started).await;
        }

        // Some loop gave up early. Nothing else can change the verdict, but the
        // failure is only declared once the overall timeout has elapsed.
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                let elapsed = started.elapsed();
                return Err(BootstrapError::Cancelled { elapsed });
            }
            _ = sleep_until(deadline) => {}
        }

        self.finish_timed_out(started).await
    }

    async fn finish_ready(&self, started: Instant) -> Result<HealthSnapshot, BootstrapError> {
        let elapsed = started.elapsed();
        if let Err(err) = self.health.complete_bootstrap().await {
            tracing::warn!(error = %err, "bootstrap completion rejected");
        }
        metrics().record_bootstrap_finished(BootstrapState::Ready, elapsed);
        tracing::info!(elapsed_ms = duration_ms(elapsed), "bootstrap completed");
        Ok(self.health.snapshot().await)
    }

    async fn finish_timed_out(&self, started: Instant) -> Result<HealthSnapshot, BootstrapError> {
        let elapsed = started.elapsed();
        if let Err(err) = self.health.mark_bootstrap_timed_out().await {
            tracing::warn!(error = %err, "bootstrap timeout transition rejected");
        }

        let snapshot = self.health.snapshot().await;
        let outstanding: Vec<_> = snapshot
            .dependencies
            .iter()
            .filter(|dependency| !dependency.ever_succeeded)
            .map(|dependency| OutstandingDependency {
                name: dependency.name.clone(),
                kind: dependency.kind,
                attempts: dependency.attempt(),
                error: dependency.error(),
                detail: dependency
                    .last
                    .as_ref()
                    .and_then(|result| result.detail.clone()),
            })
            .collect();

        metrics().record_bootstrap_finished(BootstrapState::Failed, elapsed);
        for dependency in &outstanding {
            probe_event!(
                error,
                "dependency outstanding at bootstrap deadline",
                dependency = dependency.name,
                kind = dependency.kind,
                attempts = dependency.attempts,
                error = dependency.error.map(ProbeErrorKind::as_str).unwrap_or("none"),
            );
        }

        Err(BootstrapError::TimedOut {
            elapsed,
            outstanding,
        })
    }
}

/// Convenience wrapper: bootstrap `probes` against `health` with no external cancellation.
pub async fn bootstrap(
    settings: BootstrapSettings,
    probes: Vec<SharedProbe>,
    health: HealthState,
) -> Result<HealthSnapshot, BootstrapError> {
    BootstrapOrchestrator::new(settings, probes, health)
        .run(&CancellationToken::new())
        .await
}

async fn join_loops(loops: &mut JoinSet<LoopOutcome>) -> bool {
    let mut all_succeeded = true;
    while let Some(joined) = loops.join_next().await {
        match joined {
            Ok(LoopOutcome::Succeeded) => {}
            Ok(LoopOutcome::Exhausted | LoopOutcome::DeadlineReached) => all_succeeded = false,
            Err(err) => {
                tracing::error!(error = %err, "bootstrap probe task failed");
                all_succeeded = false;
            }
        }
    }
    all_succeeded
}

async fn retry_loop(
    probe: SharedProbe,
    mut schedule: RetrySchedule,
    probe_timeout: Duration,
    deadline: Instant,
    health: HealthState,
) -> LoopOutcome {
    let descriptor = probe.descriptor().clone();
    let started = Instant::now();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return LoopOutcome::DeadlineReached;
        }
        let Some(attempt) = schedule.begin_attempt() else {
            return LoopOutcome::Exhausted;
        };

        let result = probe::attempt(probe.as_ref(), attempt, probe_timeout.min(remaining)).await;
        metrics().record_probe_attempt(descriptor.kind, &result, ProbePhase::Bootstrap);
        let success = result.success;
        log_attempt(&descriptor.kind, &result);

        if let Err(err) = health.record_result(result).await {
            tracing::warn!(
                dependency = %descriptor.name,
                error = %err,
                "failed to record probe result"
            );
        }

        if success {
            probe_event!(
                info,
                "dependency ready",
                dependency = descriptor.name,
                kind = descriptor.kind,
                attempts = attempt,
                duration_ms = duration_ms(started.elapsed()),
            );
            return LoopOutcome::Succeeded;
        }

        let Some(delay) = schedule.after_failure() else {
            probe_event!(
                error,
                "dependency retry budget exhausted",
                dependency = descriptor.name,
                kind = descriptor.kind,
                attempts = attempt,
                duration_ms = duration_ms(started.elapsed()),
            );
            return LoopOutcome::Exhausted;
        };

        if Instant::now() + delay >= deadline {
            return LoopOutcome::DeadlineReached;
        }
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

fn log_attempt(kind: &DependencyKind, result: &ProbeResult) {
    match result.error {
        None => probe_event!(
            debug,
            "probe attempt succeeded",
            dependency = result.dependency,
            kind = kind,
            attempt = result.attempt,
            latency_ms = result.latency_ms(),
        ),
        Some(error) => probe_event!(
            warn,
            "probe attempt failed",
            dependency = result.dependency,
            kind = kind,
            attempt = result.attempt,
            latency_ms = result.latency_ms(),
            error = error,
            detail = result.detail.as_deref().unwrap_or(""),
        ),
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    std::cmp::min(duration.as_millis(), u128::from(u64::MAX)) as u64
}
