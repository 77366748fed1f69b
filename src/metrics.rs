use crate::probe::{DependencyKind, ProbeResult};
use crate::readiness::{HealthSnapshot, OverallStatus};
use crate::telemetry::{runtime_counters, RuntimeCounters};
use std::fmt::Write as _;
use std::sync::OnceLock;
use std::time::Duration;

pub use crate::telemetry::{
    BootstrapSnapshot, BootstrapState, DependencyProbeSnapshot, HttpDurationSnapshot,
    HttpMetricsSnapshot, ProbePhase, RuntimeCountersSnapshot,
};

const METRIC_PREFIX: &str = "readygate";

/// Collector that wraps the runtime counter APIs with a single entrypoint.
pub struct MetricsCollector {
    counters: &'static RuntimeCounters,
}

impl MetricsCollector {
    fn new() -> Self {
        Self {
            counters: runtime_counters(),
        }
    }

    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<MetricsCollector> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        self.counters.snapshot()
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.counters.http_metrics_snapshot()
    }

    pub fn register_dependency(&self, dependency: &str, kind: DependencyKind) {
        self.counters.register_dependency(dependency, kind);
    }

    pub fn record_probe_attempt(&self, kind: DependencyKind, result: &ProbeResult, phase: ProbePhase) {
        self.counters.record_probe_attempt(kind, result, phase);
    }

    pub fn record_bootstrap_started(&self) {
        self.counters.record_bootstrap_started();
    }

    pub fn record_bootstrap_finished(&self, state: BootstrapState, elapsed: Duration) {
        self.counters.record_bootstrap_finished(state, elapsed);
    }

    pub fn record_http_request(&self, route: &str, status: u16, duration: Duration) {
        self.counters.record_http_request(route, status, duration);
    }

    pub fn record_http_panic(&self) {
        self.counters.record_http_panic();
    }
}

/// Returns the shared `MetricsCollector` instance.
pub fn metrics() -> &'static MetricsCollector {
    MetricsCollector::global()
}

/// Renders the Prometheus text exposition for `/metrics`.
pub fn render_prometheus(health: &HealthSnapshot) -> String {
    let counters = metrics().snapshot();
    let http = metrics().http_metrics_snapshot();

    let mut output = String::new();
    append_health_metrics(&mut output, health);
    append_bootstrap_metrics(&mut output, &counters.bootstrap);
    append_probe_metrics(&mut output, &counters.dependencies);
    append_http_request_metrics(&mut output, &http, counters.http_panics_recovered);
    output
}

fn header(output: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(output, "# HELP {METRIC_PREFIX}_{name} {help}");
    let _ = writeln!(output, "# TYPE {METRIC_PREFIX}_{name} {kind}");
}

fn append_health_metrics(output: &mut String, health: &HealthSnapshot) {
    header(
        output,
        "health_status",
        "gauge",
        "Overall health status (0=starting,1=ready,2=degraded,3=failed)",
    );
    let _ = writeln!(
        output,
        "{METRIC_PREFIX}_health_status {}",
        status_gauge(health.status)
    );

    if health.dependencies.is_empty() {
        return;
    }

    header(
        output,
        "dependency_up",
        "gauge",
        "Whether the latest probe of a dependency succeeded",
    );
    for dependency in &health.dependencies {
        let _ = writeln!(
            output,
            "{METRIC_PREFIX}_dependency_up{{dependency=\"{}\",kind=\"{}\"}} {}",
            bounded_label(&dependency.name),
            dependency.kind,
            u8::from(dependency.success())
        );
    }

    header(
        output,
        "dependency_consecutive_failures",
        "gauge",
        "Consecutive failed probes per dependency",
    );
    for dependency in &health.dependencies {
        let _ = writeln!(
            output,
            "{METRIC_PREFIX}_dependency_consecutive_failures{{dependency=\"{}\"}} {}",
            bounded_label(&dependency.name),
            dependency.consecutive_failures
        );
    }
}

fn append_bootstrap_metrics(output: &mut String, bootstrap: &BootstrapSnapshot) {
    header(
        output,
        "bootstrap_state",
        "gauge",
        "Bootstrap outcome (0=pending,1=ready,2=failed)",
    );
    let _ = writeln!(
        output,
        "{METRIC_PREFIX}_bootstrap_state {}",
        bootstrap_gauge(bootstrap.state)
    );

    header(
        output,
        "bootstrap_duration_seconds",
        "gauge",
        "Elapsed time of the last finished bootstrap",
    );
    let seconds = bootstrap
        .duration_ms
        .map(|ms| ms as f64 / 1000.0)
        .unwrap_or(0.0);
    let _ = writeln!(
        output,
        "{METRIC_PREFIX}_bootstrap_duration_seconds {seconds:.3}"
    );
}

fn append_probe_metrics(output: &mut String, dependencies: &[DependencyProbeSnapshot]) {
    if dependencies.is_empty() {
        return;
    }

    header(
        output,
        "probe_attempts_total",
        "counter",
        "Probe attempts by dependency and phase",
    );
    for entry in dependencies {
        let dependency = bounded_label(&entry.dependency);
        let _ = writeln!(
            output,
            "{METRIC_PREFIX}_probe_attempts_total{{dependency=\"{dependency}\",phase=\"bootstrap\"}} {}",
            entry.bootstrap_attempts
        );
        let _ = writeln!(
            output,
            "{METRIC_PREFIX}_probe_attempts_total{{dependency=\"{dependency}\",phase=\"recheck\"}} {}",
            entry.recheck_attempts
        );
    }

    header(
        output,
        "probe_success_total",
        "counter",
        "Successful probe attempts by dependency",
    );
    for entry in dependencies {
        let _ = writeln!(
            output,
            "{METRIC_PREFIX}_probe_success_total{{dependency=\"{}\"}} {}",
            bounded_label(&entry.dependency),
            entry.success
        );
    }

    header(
        output,
        "probe_failures_total",
        "counter",
        "Failed probe attempts by dependency and classification",
    );
    for entry in dependencies {
        let dependency = bounded_label(&entry.dependency);
        for (reason, total) in &entry.failures_by_reason {
            let _ = writeln!(
                output,
                "{METRIC_PREFIX}_probe_failures_total{{dependency=\"{dependency}\",reason=\"{reason}\"}} {total}"
            );
        }
    }

    header(
        output,
        "probe_latency_seconds",
        "histogram",
        "Probe attempt latency",
    );
    for entry in dependencies {
        let dependency = bounded_label(&entry.dependency);
        for (boundary, cumulative) in &entry.latency.buckets {
            let _ = writeln!(
                output,
                "{METRIC_PREFIX}_probe_latency_seconds_bucket{{dependency=\"{dependency}\",le=\"{boundary}\"}} {cumulative}"
            );
        }
        let _ = writeln!(
            output,
            "{METRIC_PREFIX}_probe_latency_seconds_bucket{{dependency=\"{dependency}\",le=\"+Inf\"}} {}",
            entry.latency.count
        );
        let _ = writeln!(
            output,
            "{METRIC_PREFIX}_probe_latency_seconds_sum{{dependency=\"{dependency}\"}} {:.6}",
            entry.latency.sum
        );
        let _ = writeln!(
            output,
            "{METRIC_PREFIX}_probe_latency_seconds_count{{dependency=\"{dependency}\"}} {}",
            entry.latency.count
        );
    }
}

fn append_http_request_metrics(output: &mut String, http: &HttpMetricsSnapshot, panics: u64) {
    header(
        output,
        "http_requests_total",
        "counter",
        "HTTP request outcomes by route and status code",
    );
    if http.requests.is_empty() {
        let _ = writeln!(
            output,
            "{METRIC_PREFIX}_http_requests_total{{route=\"none\",code=\"0\"}} 0"
        );
    } else {
        for entry in &http.requests {
            let _ = writeln!(
                output,
                "{METRIC_PREFIX}_http_requests_total{{route=\"{}\",code=\"{}\"}} {}",
                bounded_label(&entry.route),
                entry.status_code,
                entry.total
            );
        }
    }

    if !http.durations.is_empty() {
        header(
            output,
            "http_request_duration_seconds",
            "histogram",
            "HTTP request latency",
        );
        for entry in &http.durations {
            let route = bounded_label(&entry.route);
            for (boundary, cumulative) in &entry.buckets {
                let _ = writeln!(
                    output,
                    "{METRIC_PREFIX}_http_request_duration_seconds_bucket{{route=\"{route}\",le=\"{boundary}\"}} {cumulative}"
                );
            }
            let _ = writeln!(
                output,
                "{METRIC_PREFIX}_http_request_duration_seconds_bucket{{route=\"{route}\",le=\"+Inf\"}} {}",
                entry.count
            );
            let _ = writeln!(
                output,
                "{METRIC_PREFIX}_http_request_duration_seconds_sum{{route=\"{route}\"}} {:.6}",
                entry.sum
            );
            let _ = writeln!(
                output,
                "{METRIC_PREFIX}_http_request_duration_seconds_count{{route=\"{route}\"}} {}",
                entry.count
            );
        }
    }

    header(
        output,
        "http_panics_recovered_total",
        "counter",
        "Handler panics converted into 500 responses",
    );
    let _ = writeln!(output, "{METRIC_PREFIX}_http_panics_recovered_total {panics}");
}

fn status_gauge(status: OverallStatus) -> u8 {
    match status {
        OverallStatus::Starting => 0,
        OverallStatus::Ready => 1,
        OverallStatus::Degraded => 2,
        OverallStatus::Failed => 3,
    }
}

fn bootstrap_gauge(state: BootstrapState) -> u8 {
    match state {
        BootstrapState::Pending => 0,
        BootstrapState::Ready => 1,
        BootstrapState::Failed => 2,
    }
}

fn bounded_label(value: &str) -> String {
    const MAX_LEN: usize = 40;
    let trimmed: String = value.chars().take(MAX_LEN).collect();
    trimmed.replace(['"', '\\', '\n'], "_")
}
