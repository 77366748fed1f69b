use super::{DependencyDescriptor, Probe, ProbeFailure};
use crate::config::{SqlSettings, SslMode};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Pool, Postgres};
use std::time::Duration;

const INVALID_PASSWORD: &str = "28P01";
const INVALID_AUTHORIZATION: &str = "28000";
const INVALID_CATALOG: &str = "3D000";

/// Acquires a pooled connection and runs `SELECT 1`.
///
/// The pool is created lazily so construction does no I/O; each check reuses it.
pub struct PostgresProbe {
    descriptor: DependencyDescriptor,
    pool: Pool<Postgres>,
    target: String,
}

impl PostgresProbe {
    pub fn new(descriptor: DependencyDescriptor, settings: &SqlSettings, probe_timeout: Duration) -> Self {
        let mut options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .database(&settings.database)
            .ssl_mode(pg_ssl_mode(settings.ssl_mode))
            .application_name("readygate");
        if let Some(password) = &settings.password {
            options = options.password(password);
        }

        let pool: PgPool = PgPoolOptions::new()
            .min_connections(settings.min_pool)
            .max_connections(settings.max_pool)
            .acquire_timeout(probe_timeout)
            .connect_lazy_with(options);

        let target = descriptor
            .targets
            .first()
            .cloned()
            .unwrap_or_else(|| format!("{}:{}", settings.host, settings.port));

        Self {
            descriptor,
            pool,
            target,
        }
    }
}

#[async_trait]
impl Probe for PostgresProbe {
    fn descriptor(&self) -> &DependencyDescriptor {
        &self.descriptor
    }

    async fn check(&self, timeout: Duration) -> Result<(), ProbeFailure> {
        let query = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool);
        match tokio::time::timeout(timeout, query).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(classify(&err, &self.target)),
            Err(_) => Err(ProbeFailure::timeout(format!(
                "{} did not answer SELECT 1 in time",
                self.target
            ))),
        }
    }
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

fn classify(err: &sqlx::Error, target: &str) -> ProbeFailure {
    match err {
        sqlx::Error::PoolTimedOut => {
            ProbeFailure::timeout(format!("no connection to {target} before the deadline"))
        }
        sqlx::Error::Io(io) => ProbeFailure::unreachable(format!("{target}: {io}")),
        sqlx::Error::PoolClosed => ProbeFailure::unreachable(format!("{target}: pool closed")),
        sqlx::Error::Database(db) => classify_sqlstate(db.code().as_deref(), target, db.message()),
        sqlx::Error::Tls(tls) => ProbeFailure::protocol(format!("{target}: TLS failure: {tls}")),
        other => ProbeFailure::protocol(format!("{target}: {other}")),
    }
}

fn classify_sqlstate(code: Option<&str>, target: &str, message: &str) -> ProbeFailure {
    match code {
        Some(INVALID_PASSWORD) | Some(INVALID_AUTHORIZATION) => {
            ProbeFailure::auth(format!("{target} rejected the login"))
        }
        Some(INVALID_CATALOG) => {
            ProbeFailure::protocol(format!("{target}: database does not exist"))
        }
        Some(code) => ProbeFailure::protocol(format!("{target}: {message} (SQLSTATE {code})")),
        None => ProbeFailure::protocol(format!("{target}: {message}")),
    }
}
