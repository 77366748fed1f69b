mod support;

use anyhow::{Context, Result};
use readygate::app::ReadygateApp;
use readygate::config::Settings;
use readygate::probe::DependencyKind;
use readygate::readiness::{HealthState, OverallStatus};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use support::{reserve_port, shared, ScriptedProbe, Step};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

fn settings(port: u16) -> Result<Settings> {
    let env: HashMap<String, String> = [
        ("READYGATE__SERVER__HOST", "127.0.0.1".to_string()),
        ("READYGATE__SERVER__PORT", port.to_string()),
        ("READYGATE__SERVER__SHUTDOWN_TIMEOUT", "2s".to_string()),
        ("READYGATE__BOOTSTRAP__TIMEOUT", "3s".to_string()),
        ("READYGATE__BOOTSTRAP__PROBE_TIMEOUT", "300ms".to_string()),
        ("READYGATE__BOOTSTRAP__BACKOFF_BASE", "100ms".to_string()),
        ("READYGATE__BOOTSTRAP__RECHECK_INTERVAL", "500ms".to_string()),
        ("READYGATE__BROKER__ENABLED", "false".to_string()),
        ("READYGATE__STREAM__ENABLED", "false".to_string()),
        ("READYGATE__SQL__ENABLED", "false".to_string()),
        ("READYGATE__KV__ENABLED", "false".to_string()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect();

    Settings::load_with(None, Some(env)).context("load lifecycle settings")
}

async fn deep_health(client: &reqwest::Client, base_url: &str) -> Result<Value> {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match client.get(format!("{base_url}/health/deep")).send().await {
            Ok(response) => return Ok(response.json().await?),
            Err(err) if Instant::now() >= deadline => {
                return Err(err).context("management server never answered")
            }
            Err(_) => sleep(Duration::from_millis(20)).await,
        }
    }
}

async fn wait_for_status(health: &HealthState, expected: OverallStatus) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(6);
    while health.overall_status().await != expected {
        anyhow::ensure!(Instant::now() < deadline, "status never became {expected}");
        sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn serves_during_bootstrap_rechecks_after_timeout_and_drains_on_stop() -> Result<()> {
    let port = reserve_port().context("reserve management port")?;
    let postgres = ScriptedProbe::always("postgres", DependencyKind::Sql, Step::Hang);
    let redis = ScriptedProbe::always("redis", DependencyKind::KvStore, Step::Succeed);

    let app = ReadygateApp::with_probes(settings(port)?, vec![shared(&postgres), shared(&redis)]);
    let health = app.state().health.clone();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(app.run_until(async move {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::new();
    let base_url = format!("http://127.0.0.1:{port}");

    // The listener is bound before bootstrap, so diagnostics are available while it hangs.
    let deep = deep_health(&client, &base_url).await?;
    assert_eq!(deep["status"], "starting");
    assert_eq!(deep["dependencies"][0]["name"], "postgres");
    assert_eq!(deep["dependencies"][1]["name"], "redis");

    wait_for_status(&health, OverallStatus::Failed).await?;
    let after_bootstrap = redis.calls();
    sleep(Duration::from_millis(1_200)).await;
    assert!(
        redis.calls() > after_bootstrap,
        "rechecks did not run after the bootstrap timeout"
    );

    let deep = deep_health(&client, &base_url).await?;
    assert_eq!(deep["status"], "failed");
    assert_eq!(deep["dependencies"][0]["error"], "timeout");
    assert_eq!(deep["dependencies"][1]["success"], true);

    stop_tx.send(()).ok();
    let stopped = timeout(SHUTDOWN_TIMEOUT + Duration::from_secs(1), running)
        .await
        .context("run_until did not return within the shutdown timeout")?;
    stopped.context("app task panicked")??;

    let calls_at_stop = redis.calls();
    sleep(Duration::from_millis(700)).await;
    assert_eq!(redis.calls(), calls_at_stop, "rechecks kept running after stop");
    assert!(client.get(format!("{base_url}/health")).send().await.is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_during_bootstrap_returns_promptly() -> Result<()> {
    let port = reserve_port().context("reserve management port")?;
    let postgres = ScriptedProbe::always("postgres", DependencyKind::Sql, Step::Hang);

    let app = ReadygateApp::with_probes(settings(port)?, vec![shared(&postgres)]);
    let health = app.state().health.clone();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(app.run_until(async move {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::new();
    deep_health(&client, &format!("http://127.0.0.1:{port}")).await?;

    stop_tx.send(()).ok();
    let stopped = timeout(SHUTDOWN_TIMEOUT, running)
        .await
        .context("run_until did not return within the shutdown timeout")?;
    stopped.context("app task panicked")??;

    assert_eq!(health.overall_status().await, OverallStatus::Starting);
    Ok(())
}
