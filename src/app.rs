use crate::app_state::AppState;
use crate::config::{redact_url, Settings};
use crate::error::{Context, Result};
use crate::management::ManagementServer;
use crate::probe::{build_probes, SharedProbe};
use crate::readiness::bootstrap::duration_ms;
use crate::readiness::{BootstrapError, BootstrapOrchestrator, HealthState, RecheckLoop};
use std::future::Future;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Process wiring: settings → probes → HTTP front → bootstrap → background re-checks.
pub struct ReadygateApp {
    settings: Settings,
    state: AppState,
    probes: Vec<SharedProbe>,
    management: ManagementServer,
    shutdown: CancellationToken,
}

impl ReadygateApp {
    pub fn initialise(settings: Settings) -> Result<Self> {
        let probes = build_probes(&settings).context("failed to construct dependency probes")?;
        Ok(Self::with_probes(settings, probes))
    }

    /// Wires the app around an explicit probe set; health tracks exactly these probes.
    pub fn with_probes(settings: Settings, probes: Vec<SharedProbe>) -> Self {
        let health = HealthState::new(probes.iter().map(|probe| probe.descriptor().clone()));
        let state = AppState::new(&settings, health);
        let management = ManagementServer::build(&settings.server);

        Self {
            settings,
            state,
            probes,
            management,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Runs until `stop` resolves or the shutdown token is cancelled.
    pub async fn run_until<F>(self, stop: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            settings,
            state,
            probes,
            management,
            shutdown,
        } = self;

        let server = management.bind().await?;
        let addr = server.local_addr()?;

        let stop_token = shutdown.clone();
        let stop_task = tokio::spawn(async move {
            tokio::select! {
                _ = stop => {
                    tracing::info!("shutdown signal received");
                    stop_token.cancel();
                }
                _ = stop_token.cancelled() => {}
            }
        });

        let server_state = state.clone();
        let server_shutdown = shutdown.clone();
        let mut server_task =
            tokio::spawn(async move { server.serve(server_state, server_shutdown).await });

        match settings.telemetry.endpoint.as_ref() {
            Some(endpoint) => tracing::info!(
                service = %settings.telemetry.service_name,
                endpoint = %redact_url(endpoint),
                "telemetry export endpoint configured"
            ),
            None => tracing::info!(
                service = %settings.telemetry.service_name,
                "telemetry export endpoint not configured"
            ),
        }
        tracing::info!(
            addr = %addr,
            dependencies = probes.len(),
            "readygate started; press Ctrl+C to stop"
        );

        let orchestrator =
            BootstrapOrchestrator::new(settings.bootstrap, probes.clone(), state.health.clone());
        let outcome = tokio::select! {
            outcome = orchestrator.run(&shutdown) => outcome,
            joined = &mut server_task => {
                shutdown.cancel();
                stop_task.abort();
                return server_exit(joined);
            }
        };

        match outcome {
            Ok(snapshot) => {
                tracing::info!(status = %snapshot.status, "bootstrap finished; all dependencies ready");
            }
            Err(BootstrapError::Cancelled { .. }) => {}
            Err(err @ BootstrapError::TimedOut { .. }) => {
                tracing::error!(error = %err, "bootstrap failed; serving health endpoints in failed state");
            }
        }

        let mut rechecks = if shutdown.is_cancelled() {
            JoinSet::new()
        } else {
            RecheckLoop::new(&settings.bootstrap, probes, state.health.clone())
                .spawn(shutdown.clone())
        };

        tokio::select! {
            _ = shutdown.cancelled() => {}
            joined = &mut server_task => {
                shutdown.cancel();
                rechecks.shutdown().await;
                stop_task.abort();
                return server_exit(joined);
            }
        }

        tracing::info!(
            timeout_ms = duration_ms(settings.server.shutdown_timeout),
            "draining management server"
        );

        let drain = async {
            while rechecks.join_next().await.is_some() {}
            (&mut server_task).await
        };
        let result = match timeout(settings.server.shutdown_timeout, drain).await {
            Ok(joined) => server_exit(joined),
            Err(_) => {
                tracing::warn!("shutdown timeout elapsed; aborting remaining tasks");
                rechecks.abort_all();
                server_task.abort();
                Ok(())
            }
        };

        stop_task.abort();
        tracing::info!("readygate stopped");
        result
    }
}

fn server_exit(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.context("management server task did not complete")?
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
