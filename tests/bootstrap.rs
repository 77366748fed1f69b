mod support;

use readygate::codec::http::deep_health_payload;
use readygate::probe::{DependencyKind, ProbeErrorKind, SharedProbe};
use readygate::readiness::{
    bootstrap, BootstrapError, BootstrapOrchestrator, HealthState, OverallStatus,
};
use std::time::Duration;
use support::{bootstrap_settings, descriptors, shared, ScriptedProbe, Step};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn health_for(probes: &[SharedProbe]) -> HealthState {
    HealthState::new(descriptors(probes))
}

#[tokio::test(start_paused = true)]
async fn sql_dependency_ready_on_third_attempt() {
    let sql = ScriptedProbe::new(
        "postgres",
        DependencyKind::Sql,
        [
            Step::Fail(ProbeErrorKind::Unreachable),
            Step::Fail(ProbeErrorKind::Unreachable),
        ],
        Step::Succeed,
    );
    let probes = vec![shared(&sql)];
    let health = health_for(&probes);

    let started = Instant::now();
    let snapshot = bootstrap(bootstrap_settings(Duration::from_secs(10)), probes, health.clone())
        .await
        .expect("bootstrap succeeds");
    let elapsed = started.elapsed();

    // 1s + 2s of backoff before the third attempt.
    assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(3_100), "elapsed {elapsed:?}");
    assert_eq!(sql.calls(), 3);
    assert_eq!(snapshot.status, OverallStatus::Ready);

    let postgres = snapshot.dependency("postgres").expect("postgres tracked");
    assert!(postgres.success());
    assert_eq!(postgres.attempt(), 3);
    assert_eq!(postgres.consecutive_failures, 0);
    assert_eq!(health.overall_status().await, OverallStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn all_four_kinds_ready_once_sql_passes_third_attempt() {
    let nats = ScriptedProbe::always("nats", DependencyKind::Broker, Step::Succeed);
    let pulsar = ScriptedProbe::always("pulsar", DependencyKind::StreamPlatform, Step::Succeed);
    let postgres = ScriptedProbe::new(
        "postgres",
        DependencyKind::Sql,
        [
            Step::Fail(ProbeErrorKind::Unreachable),
            Step::Fail(ProbeErrorKind::Unreachable),
        ],
        Step::Succeed,
    );
    let redis = ScriptedProbe::always("redis", DependencyKind::KvStore, Step::Succeed);
    let probes = vec![
        shared(&nats),
        shared(&pulsar),
        shared(&postgres),
        shared(&redis),
    ];
    let health = health_for(&probes);

    let started = Instant::now();
    let snapshot = bootstrap(bootstrap_settings(Duration::from_secs(10)), probes, health)
        .await
        .expect("bootstrap succeeds");
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(3_100), "elapsed {elapsed:?}");
    assert_eq!(snapshot.status, OverallStatus::Ready);
    assert_eq!(snapshot.dependencies.len(), 4);

    for name in ["nats", "pulsar", "redis"] {
        let dependency = snapshot.dependency(name).expect("tracked");
        assert!(dependency.success(), "{name}");
        assert_eq!(dependency.attempt(), 1, "{name}");
    }
    let sql = snapshot.dependency("postgres").expect("postgres tracked");
    assert!(sql.success());
    assert_eq!(sql.attempt(), 3);
    assert_eq!(postgres.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn deep_health_reports_hyphenated_error_classes() {
    let broker = ScriptedProbe::always(
        "nats",
        DependencyKind::Broker,
        Step::Fail(ProbeErrorKind::AuthFailure),
    );
    let stream = ScriptedProbe::always(
        "pulsar",
        DependencyKind::StreamPlatform,
        Step::Fail(ProbeErrorKind::ProtocolError),
    );
    let probes = vec![shared(&broker), shared(&stream)];
    let health = health_for(&probes);

    bootstrap(bootstrap_settings(Duration::from_secs(3)), probes, health.clone())
        .await
        .expect_err("bootstrap must fail");

    let body = deep_health_payload(&health.snapshot().await);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["dependencies"][0]["error"], "auth-failure");
    assert_eq!(body["dependencies"][1]["error"], "protocol-error");
    assert_eq!(body["dependencies"][1]["kind"], "stream-platform");
}

#[tokio::test(start_paused = true)]
async fn unresponsive_dependency_fails_bootstrap_at_deadline() {
    let stuck = ScriptedProbe::always("postgres", DependencyKind::Sql, Step::Hang);
    let redis = ScriptedProbe::always("redis", DependencyKind::KvStore, Step::Succeed);
    let probes = vec![shared(&stuck), shared(&redis)];
    let health = health_for(&probes);

    let started = Instant::now();
    let err = bootstrap(bootstrap_settings(Duration::from_secs(5)), probes, health.clone())
        .await
        .expect_err("bootstrap must time out");
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(5), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(5_100), "elapsed {elapsed:?}");

    let BootstrapError::TimedOut { outstanding, .. } = &err else {
        panic!("expected timeout, got {err}");
    };
    assert_eq!(outstanding.len(), 1);
    assert_eq!(outstanding[0].name, "postgres");
    assert_eq!(outstanding[0].error, Some(ProbeErrorKind::Timeout));
    assert!(err.to_string().contains("postgres [sql]"));

    let snapshot = health.snapshot().await;
    assert_eq!(snapshot.status, OverallStatus::Failed);
    let postgres = snapshot.dependency("postgres").expect("postgres tracked");
    assert!(!postgres.success());
    assert_eq!(postgres.error(), Some(ProbeErrorKind::Timeout));
    assert!(snapshot.dependency("redis").expect("redis tracked").success());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retry_budget_still_waits_for_deadline() {
    let broker = ScriptedProbe::always(
        "nats",
        DependencyKind::Broker,
        Step::Fail(ProbeErrorKind::AuthFailure),
    );
    let probes = vec![shared(&broker)];
    let health = health_for(&probes);
    let mut settings = bootstrap_settings(Duration::from_secs(30));
    settings.max_attempts = 2;

    let started = Instant::now();
    let err = bootstrap(settings, probes, health.clone())
        .await
        .expect_err("bootstrap must fail");

    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(broker.calls(), 2);
    match err {
        BootstrapError::TimedOut { outstanding, .. } => {
            assert_eq!(outstanding[0].attempts, 2);
            assert_eq!(outstanding[0].error, Some(ProbeErrorKind::AuthFailure));
        }
        other => panic!("expected timeout, got {other}"),
    }
    assert_eq!(health.overall_status().await, OverallStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn empty_dependency_set_is_ready_immediately() {
    let health = HealthState::new(Vec::new());
    let started = Instant::now();

    let snapshot = bootstrap(bootstrap_settings(Duration::from_secs(5)), Vec::new(), health)
        .await
        .expect("nothing to wait for");

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(snapshot.status, OverallStatus::Ready);
    assert!(snapshot.dependencies.is_empty());
}

#[tokio::test(start_paused = true)]
async fn partial_progress_is_visible_before_bootstrap_returns() {
    let slow = ScriptedProbe::new(
        "pulsar",
        DependencyKind::StreamPlatform,
        [Step::Fail(ProbeErrorKind::ProtocolError)],
        Step::Succeed,
    );
    let fast = ScriptedProbe::always("redis", DependencyKind::KvStore, Step::Succeed);
    let probes = vec![shared(&slow), shared(&fast)];
    let health = health_for(&probes);

    let task = tokio::spawn(bootstrap(
        bootstrap_settings(Duration::from_secs(10)),
        probes,
        health.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(500)).await;
    let midway = health.snapshot().await;
    assert_eq!(midway.status, OverallStatus::Starting);
    let pulsar = midway.dependency("pulsar").expect("pulsar tracked");
    assert_eq!(pulsar.error(), Some(ProbeErrorKind::ProtocolError));
    assert_eq!(pulsar.consecutive_failures, 1);
    assert!(midway.dependency("redis").expect("redis tracked").success());

    let snapshot = task.await.expect("join").expect("bootstrap succeeds");
    assert_eq!(snapshot.status, OverallStatus::Ready);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_bootstrap() {
    let stuck = ScriptedProbe::always("postgres", DependencyKind::Sql, Step::Hang);
    let probes = vec![shared(&stuck)];
    let health = health_for(&probes);
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let orchestrator = BootstrapOrchestrator::new(
        bootstrap_settings(Duration::from_secs(60)),
        probes,
        health.clone(),
    );
    let err = orchestrator.run(&shutdown).await.expect_err("cancelled");

    assert!(matches!(err, BootstrapError::Cancelled { .. }));
    assert_eq!(health.overall_status().await, OverallStatus::Starting);
}

#[tokio::test(start_paused = true)]
async fn slow_success_within_probe_timeout_counts() {
    let slow = ScriptedProbe::always(
        "nats",
        DependencyKind::Broker,
        Step::SlowSucceed(Duration::from_millis(1_500)),
    );
    let probes = vec![shared(&slow)];
    let health = health_for(&probes);

    let snapshot = bootstrap(bootstrap_settings(Duration::from_secs(5)), probes, health)
        .await
        .expect("slow but in time");

    let nats = snapshot.dependency("nats").expect("nats tracked");
    assert!(nats.success());
    assert!(nats.latency_ms().unwrap_or_default() >= 1_500);
}
