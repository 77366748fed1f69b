use crate::probe::{DependencyDescriptor, DependencyKind, ProbeErrorKind, ProbeResult};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OverallStatus {
    Starting,
    Ready,
    Degraded,
    Failed,
}

impl OverallStatus {
    pub const ALL: [OverallStatus; 4] = [
        OverallStatus::Starting,
        OverallStatus::Ready,
        OverallStatus::Degraded,
        OverallStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OverallStatus::Starting => "starting",
            OverallStatus::Ready => "ready",
            OverallStatus::Degraded => "degraded",
            OverallStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("dependency `{dependency}` is not tracked")]
    DependencyUnknown { dependency: String },
    #[error("invalid health transition {from} -> {to}")]
    InvalidTransition {
        from: OverallStatus,
        to: OverallStatus,
    },
}

struct DependencyEntry {
    descriptor: DependencyDescriptor,
    last: Option<ProbeResult>,
    consecutive_failures: u32,
    ever_succeeded: bool,
}

impl DependencyEntry {
    fn is_passing(&self) -> bool {
        self.last.as_ref().is_some_and(|result| result.success)
    }
}

/// Overall status plus the latest result per dependency, kept in registration order.
///
/// `Starting` moves to `Ready` as soon as every dependency's latest result is a success
/// and to `Failed` only through [`HealthStateMachine::mark_bootstrap_timed_out`]. Once
/// out of `Starting`, results flip between `Ready` and `Degraded`. `Failed` never changes,
/// although per-dependency results keep being recorded.
pub struct HealthStateMachine {
    status: OverallStatus,
    entries: Vec<DependencyEntry>,
}

impl HealthStateMachine {
    pub fn new(dependencies: impl IntoIterator<Item = DependencyDescriptor>) -> Self {
        let entries = dependencies
            .into_iter()
            .map(|descriptor| DependencyEntry {
                descriptor,
                last: None,
                consecutive_failures: 0,
                ever_succeeded: false,
            })
            .collect();

        Self {
            status: OverallStatus::Starting,
            entries,
        }
    }

    pub fn status(&self) -> OverallStatus {
        self.status
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn all_passing(&self) -> bool {
        self.entries.iter().all(DependencyEntry::is_passing)
    }

    /// Folds `result` into its dependency and re-evaluates the overall status.
    pub fn record_result(&mut self, result: ProbeResult) -> Result<OverallStatus, TransitionError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.descriptor.name == result.dependency)
            .ok_or_else(|| TransitionError::DependencyUnknown {
                dependency: result.dependency.clone(),
            })?;

        if result.success {
            entry.consecutive_failures = 0;
            entry.ever_succeeded = true;
        } else {
            entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        }
        entry.last = Some(result);

        let next = self.evaluate();
        self.status = next;
        Ok(next)
    }

    fn evaluate(&self) -> OverallStatus {
        let passing = self.all_passing();
        match self.status {
            OverallStatus::Failed => OverallStatus::Failed,
            OverallStatus::Starting if passing => OverallStatus::Ready,
            OverallStatus::Starting => OverallStatus::Starting,
            OverallStatus::Ready | OverallStatus::Degraded if passing => OverallStatus::Ready,
            OverallStatus::Ready | OverallStatus::Degraded => OverallStatus::Degraded,
        }
    }

    /// Confirms bootstrap finished with every dependency passing. Covers the empty set.
    pub fn complete_bootstrap(&mut self) -> Result<OverallStatus, TransitionError> {
        let target = OverallStatus::Ready;
        if !Self::is_valid_transition(self.status, target) || !self.all_passing() {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        Ok(target)
    }

    pub fn mark_bootstrap_timed_out(&mut self) -> Result<OverallStatus, TransitionError> {
        let target = OverallStatus::Failed;
        if !Self::is_valid_transition(self.status, target) {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        Ok(target)
    }

    fn is_valid_transition(current: OverallStatus, next: OverallStatus) -> bool {
        match current {
            OverallStatus::Starting => matches!(
                next,
                OverallStatus::Starting | OverallStatus::Ready | OverallStatus::Failed
            ),
            OverallStatus::Ready | OverallStatus::Degraded => {
                matches!(next, OverallStatus::Ready | OverallStatus::Degraded)
            }
            OverallStatus::Failed => matches!(next, OverallStatus::Failed),
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: self.status,
            dependencies: self
                .entries
                .iter()
                .map(|entry| DependencySnapshot {
                    name: entry.descriptor.name.clone(),
                    kind: entry.descriptor.kind,
                    targets: entry.descriptor.targets.clone(),
                    last: entry.last.clone(),
                    consecutive_failures: entry.consecutive_failures,
                    ever_succeeded: entry.ever_succeeded,
                })
                .collect(),
        }
    }
}

/// Immutable copy of the health state handed to readers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub status: OverallStatus,
    pub dependencies: Vec<DependencySnapshot>,
}

impl HealthSnapshot {
    pub fn is_ready(&self) -> bool {
        self.status == OverallStatus::Ready
    }

    pub fn dependency(&self, name: &str) -> Option<&DependencySnapshot> {
        self.dependencies.iter().find(|dep| dep.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DependencySnapshot {
    pub name: String,
    pub kind: DependencyKind,
    pub targets: Vec<String>,
    pub last: Option<ProbeResult>,
    pub consecutive_failures: u32,
    pub ever_succeeded: bool,
}

impl DependencySnapshot {
    pub fn success(&self) -> bool {
        self.last.as_ref().is_some_and(|result| result.success)
    }

    pub fn attempt(&self) -> u32 {
        self.last.as_ref().map_or(0, |result| result.attempt)
    }

    pub fn latency_ms(&self) -> Option<u64> {
        self.last.as_ref().map(ProbeResult::latency_ms)
    }

    pub fn error(&self) -> Option<ProbeErrorKind> {
        self.last.as_ref().and_then(|result| result.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeFailure;
    use std::time::Duration;

    fn machine(names: &[&str]) -> HealthStateMachine {
        HealthStateMachine::new(
            names
                .iter()
                .map(|name| DependencyDescriptor::new(*name, DependencyKind::Sql, vec![])),
        )
    }

    fn ok(name: &str, attempt: u32) -> ProbeResult {
        ProbeResult::success(name, attempt, Duration::from_millis(5))
    }

    fn fail(name: &str, attempt: u32) -> ProbeResult {
        ProbeResult::failure(
            name,
            attempt,
            Duration::from_millis(5),
            ProbeFailure::unreachable("refused"),
        )
    }

    #[test]
    fn starting_becomes_ready_when_all_pass() {
        let mut state = machine(&["a", "b"]);
        assert_eq!(state.record_result(ok("a", 1)).unwrap(), OverallStatus::Starting);
        assert_eq!(state.record_result(fail("b", 1)).unwrap(), OverallStatus::Starting);
        assert_eq!(state.record_result(ok("b", 2)).unwrap(), OverallStatus::Ready);
    }

    #[test]
    fn ready_flips_to_degraded_and_back() {
        let mut state = machine(&["a"]);
        state.record_result(ok("a", 1)).unwrap();
        assert_eq!(state.record_result(fail("a", 1)).unwrap(), OverallStatus::Degraded);
        assert_eq!(state.snapshot().dependencies[0].consecutive_failures, 1);
        assert_eq!(state.record_result(ok("a", 1)).unwrap(), OverallStatus::Ready);
        assert_eq!(state.snapshot().dependencies[0].consecutive_failures, 0);
    }

    #[test]
    fn failed_is_terminal_but_results_update() {
        let mut state = machine(&["a"]);
        state.record_result(fail("a", 1)).unwrap();
        state.mark_bootstrap_timed_out().unwrap();
        assert_eq!(state.record_result(ok("a", 1)).unwrap(), OverallStatus::Failed);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.status, OverallStatus::Failed);
        assert!(snapshot.dependencies[0].success());
    }

    #[test]
    fn timeout_after_ready_is_rejected() {
        let mut state = machine(&["a"]);
        state.record_result(ok("a", 1)).unwrap();
        assert_eq!(
            state.mark_bootstrap_timed_out(),
            Err(TransitionError::InvalidTransition {
                from: OverallStatus::Ready,
                to: OverallStatus::Failed,
            })
        );
    }

    #[test]
    fn empty_set_completes_immediately() {
        let mut state = machine(&[]);
        assert_eq!(state.complete_bootstrap().unwrap(), OverallStatus::Ready);
    }

    #[test]
    fn complete_requires_every_dependency_passing() {
        let mut state = machine(&["a", "b"]);
        state.record_result(ok("a", 1)).unwrap();
        assert!(state.complete_bootstrap().is_err());
        assert_eq!(state.status(), OverallStatus::Starting);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut state = machine(&["a"]);
        assert_eq!(
            state.record_result(ok("zzz", 1)),
            Err(TransitionError::DependencyUnknown {
                dependency: "zzz".to_string()
            })
        );
    }

    #[test]
    fn pending_dependency_reports_defaults() {
        let state = machine(&["a"]);
        let dep = &state.snapshot().dependencies[0];
        assert!(!dep.success());
        assert_eq!(dep.attempt(), 0);
        assert_eq!(dep.latency_ms(), None);
        assert_eq!(dep.error(), None);
    }
}
