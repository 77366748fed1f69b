use crate::error::Result;
use crate::probe::{DependencyKind, ProbeResult};
use chrono::{SecondsFormat, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self as stdfmt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::Event;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::{
    self as fmt_subscriber, format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

const HTTP_DURATION_BUCKETS: [f64; 10] = [0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const PROBE_LATENCY_BUCKETS: [f64; 10] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Installs the process-wide subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(service_name: &str, default_filter: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|err| crate::err!("invalid log filter `{default_filter}`: {err}"))?;

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    // WARN and ERROR go to stderr, everything more verbose to stdout.
    let writer = stderr
        .with_max_level(tracing::Level::WARN)
        .or_else(stdout);

    tracing::subscriber::set_global_default(key_value_subscriber(service_name, env_filter, writer))
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))
}

/// Builds the key=value subscriber over an arbitrary writer.
pub fn key_value_subscriber<W>(
    service_name: &str,
    filter: EnvFilter,
    writer: W,
) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .event_format(KeyValueFormatter::new(service_name))
        .fmt_fields(fmt_subscriber::format::DefaultFields::new())
        .with_writer(writer)
        .finish()
}

struct KeyValueFormatter {
    service_name: String,
}

impl KeyValueFormatter {
    fn new(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for KeyValueFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let pid = std::process::id().to_string();
        let metadata = event.metadata();
        let component = metadata.target();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());

        let mut fields = visitor.fields;
        fields.sort_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs));

        let span_path = current_span_path(ctx);

        let mut line = String::new();
        push_field(&mut line, "ts", &timestamp);
        push_field(&mut line, "level", metadata.level().as_str());
        push_field(&mut line, "service", &self.service_name);
        push_field(&mut line, "component", component);
        push_field(&mut line, "pid", &pid);

        if let Some(span_path) = span_path {
            push_field(&mut line, "span", &span_path);
        }

        push_field(&mut line, "msg", &message);

        for (key, value) in fields {
            push_field(&mut line, &key, &value);
        }

        if let Some(file) = metadata.file() {
            push_field(&mut line, "file", file);
        }
        if let Some(line_no) = metadata.line() {
            push_field(&mut line, "line", &line_no.to_string());
        }

        writer.write_str(&line)?;
        writer.write_char('\n')
    }
}

fn current_span_path<S, N>(ctx: &FmtContext<'_, S, N>) -> Option<String>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    let span = ctx.lookup_current()?;
    let names: Vec<&str> = span.scope().from_root().map(|s| s.name()).collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join("."))
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn record_field(&mut self, field: &Field, value: String) {
        if field.name().is_empty() {
            return;
        }
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_field(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn stdfmt::Debug) {
        self.record_field(field, format!("{value:?}"));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_field(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_field(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_field(field, value.to_string());
    }
}

/// Which loop produced a probe observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbePhase {
    Bootstrap,
    Recheck,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BootstrapState {
    #[default]
    Pending,
    Ready,
    Failed,
}

impl BootstrapState {
    pub fn as_str(self) -> &'static str {
        match self {
            BootstrapState::Pending => "pending",
            BootstrapState::Ready => "ready",
            BootstrapState::Failed => "failed",
        }
    }
}

#[derive(Default)]
pub struct RuntimeCounters {
    dependencies: DependencyRegistry,
    bootstrap: Mutex<BootstrapEntry>,
    http_requests: HttpRequestMetrics,
    http_panics: AtomicU64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeCountersSnapshot {
    pub dependencies: Vec<DependencyProbeSnapshot>,
    pub bootstrap: BootstrapSnapshot,
    pub http_panics_recovered: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DependencyProbeSnapshot {
    pub dependency: String,
    pub kind: DependencyKind,
    pub bootstrap_attempts: u64,
    pub recheck_attempts: u64,
    pub success: u64,
    pub failures_by_reason: Vec<(String, u64)>,
    pub last_success: Option<bool>,
    pub latency: LatencyHistogramSnapshot,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LatencyHistogramSnapshot {
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapSnapshot {
    pub state: BootstrapState,
    pub runs: u64,
    pub duration_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequestCountSnapshot {
    pub route: String,
    pub status_code: u16,
    pub total: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpDurationSnapshot {
    pub route: String,
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpMetricsSnapshot {
    pub requests: Vec<HttpRequestCountSnapshot>,
    pub durations: Vec<HttpDurationSnapshot>,
}

#[derive(Default)]
struct HttpRequestMetrics {
    counts: Mutex<HashMap<(String, u16), u64>>,
    durations: Mutex<HashMap<String, DurationBuckets<{ HTTP_DURATION_BUCKETS.len() }>>>,
}

impl HttpRequestMetrics {
    fn record(&self, route: &str, status: u16, duration: Duration) {
        let mut counts = self
            .counts
            .lock()
            .expect("http request counts lock poisoned");
        *counts.entry((route.to_string(), status)).or_insert(0) += 1;
        drop(counts);

        let mut durations = self
            .durations
            .lock()
            .expect("http request durations lock poisoned");
        let entry = durations.entry(route.to_string()).or_default();
        entry.observe(&HTTP_DURATION_BUCKETS, duration.as_secs_f64());
    }

    fn snapshot(&self) -> HttpMetricsSnapshot {
        let counts_guard = self
            .counts
            .lock()
            .expect("http request counts lock poisoned");
        let durations_guard = self
            .durations
            .lock()
            .expect("http request durations lock poisoned");

        let mut requests: Vec<_> = counts_guard
            .iter()
            .map(|((route, status), total)| HttpRequestCountSnapshot {
                route: route.clone(),
                status_code: *status,
                total: *total,
            })
            .collect();
        requests.sort_by(|a, b| (&a.route, a.status_code).cmp(&(&b.route, b.status_code)));

        let mut durations: Vec<_> = durations_guard
            .iter()
            .map(|(route, buckets)| HttpDurationSnapshot {
                route: route.clone(),
                buckets: buckets.histogram(&HTTP_DURATION_BUCKETS),
                sum: buckets.sum,
                count: buckets.total,
            })
            .collect();
        durations.sort_by(|a, b| a.route.cmp(&b.route));

        HttpMetricsSnapshot {
            requests,
            durations,
        }
    }
}

struct DurationBuckets<const N: usize> {
    counts: [u64; N],
    sum: f64,
    total: u64,
}

impl<const N: usize> Default for DurationBuckets<N> {
    fn default() -> Self {
        Self {
            counts: [0; N],
            sum: 0.0,
            total: 0,
        }
    }
}

impl<const N: usize> DurationBuckets<N> {
    fn observe(&mut self, boundaries: &[f64; N], duration_secs: f64) {
        for (idx, boundary) in boundaries.iter().enumerate() {
            if duration_secs <= *boundary {
                self.counts[idx] += 1;
                break;
            }
        }
        self.sum += duration_secs;
        self.total += 1;
    }

    fn histogram(&self, boundaries: &[f64; N]) -> Vec<(f64, u64)> {
        let mut cumulative = 0;
        boundaries
            .iter()
            .enumerate()
            .map(|(idx, boundary)| {
                cumulative += self.counts[idx];
                (*boundary, cumulative)
            })
            .collect()
    }
}

static RUNTIME_COUNTERS: OnceLock<RuntimeCounters> = OnceLock::new();

pub fn runtime_counters() -> &'static RuntimeCounters {
    RUNTIME_COUNTERS.get_or_init(RuntimeCounters::default)
}

impl RuntimeCounters {
    pub fn snapshot(&self) -> RuntimeCountersSnapshot {
        RuntimeCountersSnapshot {
            dependencies: self.dependencies.snapshot(),
            bootstrap: self
                .bootstrap
                .lock()
                .expect("bootstrap entry poisoned")
                .snapshot(),
            http_panics_recovered: self.http_panics.load(Ordering::Relaxed),
        }
    }

    pub fn register_dependency(&self, dependency: &str, kind: DependencyKind) {
        self.dependencies.register(dependency, kind);
    }

    pub fn record_probe_attempt(&self, kind: DependencyKind, result: &ProbeResult, phase: ProbePhase) {
        self.dependencies.record(kind, result, phase);
    }

    pub fn record_bootstrap_started(&self) {
        let mut guard = self.bootstrap.lock().expect("bootstrap entry poisoned");
        guard.state = BootstrapState::Pending;
        guard.runs = guard.runs.saturating_add(1);
        guard.duration_ms = None;
    }

    pub fn record_bootstrap_finished(&self, state: BootstrapState, elapsed: Duration) {
        let mut guard = self.bootstrap.lock().expect("bootstrap entry poisoned");
        guard.state = state;
        guard.duration_ms = Some(std::cmp::min(elapsed.as_millis(), u128::from(u64::MAX)) as u64);
    }

    pub fn record_http_request(&self, route: &str, status: u16, duration: Duration) {
        self.http_requests.record(route, status, duration);
    }

    pub fn record_http_panic(&self) {
        self.http_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn http_metrics_snapshot(&self) -> HttpMetricsSnapshot {
        self.http_requests.snapshot()
    }
}

#[derive(Clone, Debug, Default)]
struct BootstrapEntry {
    state: BootstrapState,
    runs: u64,
    duration_ms: Option<u64>,
}

impl BootstrapEntry {
    fn snapshot(&self) -> BootstrapSnapshot {
        BootstrapSnapshot {
            state: self.state,
            runs: self.runs,
            duration_ms: self.duration_ms,
        }
    }
}

struct DependencyEntry {
    kind: DependencyKind,
    bootstrap_attempts: u64,
    recheck_attempts: u64,
    success: u64,
    failure_reasons: BTreeMap<&'static str, u64>,
    last_success: Option<bool>,
    latency: DurationBuckets<{ PROBE_LATENCY_BUCKETS.len() }>,
}

impl DependencyEntry {
    fn new(kind: DependencyKind) -> Self {
        Self {
            kind,
            bootstrap_attempts: 0,
            recheck_attempts: 0,
            success: 0,
            failure_reasons: BTreeMap::new(),
            last_success: None,
            latency: DurationBuckets::default(),
        }
    }
}

#[derive(Default)]
struct DependencyRegistry {
    inner: Mutex<BTreeMap<String, DependencyEntry>>,
}

impl DependencyRegistry {
    fn register(&self, dependency: &str, kind: DependencyKind) {
        let mut guard = self.inner.lock().expect("dependency registry poisoned");
        guard
            .entry(dependency.to_string())
            .or_insert_with(|| DependencyEntry::new(kind));
    }

    fn record(&self, kind: DependencyKind, result: &ProbeResult, phase: ProbePhase) {
        let mut guard = self.inner.lock().expect("dependency registry poisoned");
        let entry = guard
            .entry(result.dependency.clone())
            .or_insert_with(|| DependencyEntry::new(kind));

        match phase {
            ProbePhase::Bootstrap => {
                entry.bootstrap_attempts = entry.bootstrap_attempts.saturating_add(1)
            }
            ProbePhase::Recheck => entry.recheck_attempts = entry.recheck_attempts.saturating_add(1),
        }

        match result.error {
            None => entry.success = entry.success.saturating_add(1),
            Some(error) => *entry.failure_reasons.entry(error.as_str()).or_insert(0) += 1,
        }
        entry.last_success = Some(result.success);
        entry
            .latency
            .observe(&PROBE_LATENCY_BUCKETS, result.latency.as_secs_f64());
    }

    fn snapshot(&self) -> Vec<DependencyProbeSnapshot> {
        let guard = self.inner.lock().expect("dependency registry poisoned");
        guard
            .iter()
            .map(|(dependency, entry)| DependencyProbeSnapshot {
                dependency: dependency.clone(),
                kind: entry.kind,
                bootstrap_attempts: entry.bootstrap_attempts,
                recheck_attempts: entry.recheck_attempts,
                success: entry.success,
                failures_by_reason: entry
                    .failure_reasons
                    .iter()
                    .map(|(reason, count)| (reason.to_string(), *count))
                    .collect(),
                last_success: entry.last_success,
                latency: LatencyHistogramSnapshot {
                    buckets: entry.latency.histogram(&PROBE_LATENCY_BUCKETS),
                    sum: entry.latency.sum,
                    count: entry.latency.total,
                },
            })
            .collect()
    }
}

fn encode_field_value(value: &str) -> String {
    let needs_quotes = value.chars().any(|c| {
        c.is_whitespace()
            || matches!(
                c,
                '"' | '\\' | '=' | '[' | ']' | '{' | '}' | ',' | '\n' | '\r' | '\t'
            )
    });

    if !needs_quotes {
        return value.to_string();
    }

    let mut encoded = String::with_capacity(value.len() + 2);
    encoded.push('"');
    for ch in value.chars() {
        match ch {
            '"' => encoded.push_str("\\\""),
            '\\' => encoded.push_str("\\\\"),
            '\n' => encoded.push_str("\\n"),
            '\r' => encoded.push_str("\\r"),
            '\t' => encoded.push_str("\\t"),
            _ => encoded.push(ch),
        }
    }
    encoded.push('"');
    encoded
}

fn push_field(buffer: &mut String, key: &str, value: &str) {
    if !buffer.is_empty() {
        buffer.push(' ');
    }
    buffer.push_str(key);
    buffer.push('=');
    buffer.push_str(&encode_field_value(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeFailure;

    #[test]
    fn field_values_with_spaces_are_quoted() {
        assert_eq!(encode_field_value("ready"), "ready");
        assert_eq!(encode_field_value("no route"), "\"no route\"");
        assert_eq!(encode_field_value("a=\"b\""), "\"a=\\\"b\\\"\"");
    }

    #[test]
    fn latency_histogram_is_cumulative() {
        let mut buckets = DurationBuckets::<{ PROBE_LATENCY_BUCKETS.len() }>::default();
        buckets.observe(&PROBE_LATENCY_BUCKETS, 0.004);
        buckets.observe(&PROBE_LATENCY_BUCKETS, 0.2);
        let histogram = buckets.histogram(&PROBE_LATENCY_BUCKETS);
        assert_eq!(histogram[0], (0.005, 1));
        assert_eq!(histogram.last().copied(), Some((5.0, 2)));
        assert_eq!(buckets.total, 2);
    }

    #[test]
    fn probe_outcomes_are_grouped_by_reason() {
        let counters = RuntimeCounters::default();
        let refused = ProbeResult::failure(
            "redis",
            1,
            Duration::from_millis(2),
            ProbeFailure::unreachable("refused"),
        );
        counters.record_probe_attempt(DependencyKind::KvStore, &refused, ProbePhase::Bootstrap);
        counters.record_probe_attempt(
            DependencyKind::KvStore,
            &ProbeResult::success("redis", 2, Duration::from_millis(1)),
            ProbePhase::Bootstrap,
        );
        counters.record_probe_attempt(DependencyKind::KvStore, &refused, ProbePhase::Recheck);

        let snapshot = counters.snapshot();
        let redis = &snapshot.dependencies[0];
        assert_eq!(redis.bootstrap_attempts, 2);
        assert_eq!(redis.recheck_attempts, 1);
        assert_eq!(redis.success, 1);
        assert_eq!(redis.failures_by_reason, vec![("unreachable".to_string(), 2)]);
        assert_eq!(redis.last_success, Some(false));
    }
}
