use super::{
    BootstrapSettings, BrokerSettings, KvSettings, ServerSettings, ServiceSettings, Settings,
    SettingsValidationError, SqlSettings, SslMode, StreamSettings, TelemetrySettings,
};
use crate::retry::JitterMode;
use humantime::parse_duration;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use url::Url;

const DEFAULT_SERVICE_NAME: &str = "readygate";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(30);
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_LOG_FILTER: &str = "readygate=info,info";
const DEFAULT_BROKER_URL: &str = "nats://127.0.0.1:4222";
const DEFAULT_STREAM_ADMIN_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_STREAM_SERVICE_URL: &str = "pulsar://127.0.0.1:6650";
const DEFAULT_STREAM_TENANT: &str = "public";
const DEFAULT_SQL_HOST: &str = "127.0.0.1";
const DEFAULT_SQL_PORT: u16 = 5432;
const DEFAULT_SQL_USER: &str = "postgres";
const DEFAULT_SQL_DATABASE: &str = "postgres";
const DEFAULT_SQL_MIN_POOL: u32 = 1;
const DEFAULT_SQL_MAX_POOL: u32 = 5;
const DEFAULT_KV_HOST: &str = "127.0.0.1";
const DEFAULT_KV_PORT: u16 = 6379;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSettings {
    #[serde(default)]
    pub service: RawServiceSection,
    #[serde(default)]
    pub server: RawServerSection,
    #[serde(default)]
    pub bootstrap: RawBootstrapSection,
    #[serde(default)]
    pub telemetry: RawTelemetrySection,
    #[serde(default)]
    pub broker: RawBrokerSection,
    #[serde(default)]
    pub stream: RawStreamSection,
    #[serde(default)]
    pub sql: RawSqlSection,
    #[serde(default)]
    pub kv: RawKvSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawServiceSection {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawServerSection {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub read_timeout: Option<String>,
    #[serde(default)]
    pub write_timeout: Option<String>,
    #[serde(default)]
    pub shutdown_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBootstrapSection {
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff_base: Option<String>,
    #[serde(default)]
    pub backoff_ceiling: Option<String>,
    #[serde(default)]
    pub jitter: Option<String>,
    #[serde(default)]
    pub probe_timeout: Option<String>,
    #[serde(default)]
    pub recheck_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTelemetrySection {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawBrokerSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStreamSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub admin_url: Option<String>,
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSqlSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub min_pool: Option<u32>,
    #[serde(default)]
    pub max_pool: Option<u32>,
    #[serde(default)]
    pub ssl_mode: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawKvSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(default)]
    pub password: Option<String>,
}

pub(super) fn resolve(raw: RawSettings) -> Result<Settings, SettingsValidationError> {
    let mut errors = Vec::new();

    let service = resolve_service(raw.service, &mut errors);
    let server = resolve_server(raw.server, &mut errors);
    let bootstrap = resolve_bootstrap(raw.bootstrap, &mut errors);
    let telemetry = resolve_telemetry(raw.telemetry, &service, &mut errors);
    let broker = resolve_broker(raw.broker, &mut errors);
    let stream = resolve_stream(raw.stream, &mut errors);
    let sql = resolve_sql(raw.sql, &mut errors);
    let kv = resolve_kv(raw.kv, &mut errors);

    if errors.is_empty() {
        Ok(Settings {
            service,
            server,
            bootstrap,
            telemetry,
            broker,
            stream,
            sql,
            kv,
        })
    } else {
        Err(SettingsValidationError::new(errors))
    }
}

fn resolve_service(raw: RawServiceSection, errors: &mut Vec<String>) -> ServiceSettings {
    let name = non_empty_or_default(
        "service.name",
        raw.name,
        DEFAULT_SERVICE_NAME,
        errors,
    );
    ServiceSettings { name }
}

fn resolve_server(raw: RawServerSection, errors: &mut Vec<String>) -> ServerSettings {
    let host = match raw.host {
        None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        Some(value) => match value.trim().parse::<IpAddr>() {
            Ok(addr) => addr,
            Err(_) => {
                errors.push(format!(
                    "server.host must be an IP address (got `{}`)",
                    value.trim()
                ));
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            }
        },
    };

    let port = resolve_port("server.port", raw.port, DEFAULT_PORT, errors);

    ServerSettings {
        host,
        port,
        read_timeout: positive_duration(
            "server.read_timeout",
            raw.read_timeout,
            DEFAULT_READ_TIMEOUT,
            errors,
        ),
        write_timeout: positive_duration(
            "server.write_timeout",
            raw.write_timeout,
            DEFAULT_WRITE_TIMEOUT,
            errors,
        ),
        shutdown_timeout: positive_duration(
            "server.shutdown_timeout",
            raw.shutdown_timeout,
            DEFAULT_SHUTDOWN_TIMEOUT,
            errors,
        ),
    }
}

fn resolve_bootstrap(raw: RawBootstrapSection, errors: &mut Vec<String>) -> BootstrapSettings {
    let timeout = positive_duration(
        "bootstrap.timeout",
        raw.timeout,
        DEFAULT_BOOTSTRAP_TIMEOUT,
        errors,
    );

    let max_attempts = raw.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
    if max_attempts == 0 {
        errors.push("bootstrap.max_attempts must be at least 1".to_string());
    }

    let backoff_base = positive_duration(
        "bootstrap.backoff_base",
        raw.backoff_base,
        DEFAULT_BACKOFF_BASE,
        errors,
    );
    let backoff_ceiling = positive_duration(
        "bootstrap.backoff_ceiling",
        raw.backoff_ceiling,
        DEFAULT_BACKOFF_CEILING,
        errors,
    );
    if backoff_base > backoff_ceiling {
        errors.push(format!(
            "bootstrap.backoff_base ({}) must not exceed bootstrap.backoff_ceiling ({})",
            humantime::format_duration(backoff_base),
            humantime::format_duration(backoff_ceiling)
        ));
    }

    let jitter = match raw.jitter {
        None => JitterMode::None,
        Some(value) => JitterMode::parse(&value).unwrap_or_else(|| {
            errors.push(format!(
                "bootstrap.jitter must be one of none, equal, full (got `{}`)",
                value.trim()
            ));
            JitterMode::None
        }),
    };

    BootstrapSettings {
        timeout,
        max_attempts: max_attempts.max(1),
        backoff_base,
        backoff_ceiling,
        jitter,
        probe_timeout: positive_duration(
            "bootstrap.probe_timeout",
            raw.probe_timeout,
            DEFAULT_PROBE_TIMEOUT,
            errors,
        ),
        recheck_interval: positive_duration(
            "bootstrap.recheck_interval",
            raw.recheck_interval,
            DEFAULT_RECHECK_INTERVAL,
            errors,
        ),
    }
}

fn resolve_telemetry(
    raw: RawTelemetrySection,
    service: &ServiceSettings,
    errors: &mut Vec<String>,
) -> TelemetrySettings {
    let endpoint = raw
        .endpoint
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| parse_url("telemetry.endpoint", &value, errors));

    let service_name = non_empty_or_default(
        "telemetry.service_name",
        raw.service_name,
        &service.name,
        errors,
    );

    let log_filter = non_empty_or_default(
        "telemetry.log_filter",
        raw.log_filter,
        DEFAULT_LOG_FILTER,
        errors,
    );

    TelemetrySettings {
        endpoint,
        service_name,
        log_filter,
    }
}

fn resolve_broker(raw: RawBrokerSection, errors: &mut Vec<String>) -> Option<BrokerSettings> {
    if !raw.enabled.unwrap_or(true) {
        return None;
    }
    let url = required_url("broker.url", raw.url, DEFAULT_BROKER_URL, errors)?;
    Some(BrokerSettings { url })
}

fn resolve_stream(raw: RawStreamSection, errors: &mut Vec<String>) -> Option<StreamSettings> {
    if !raw.enabled.unwrap_or(true) {
        return None;
    }

    let admin_url = required_url(
        "stream.admin_url",
        raw.admin_url,
        DEFAULT_STREAM_ADMIN_URL,
        errors,
    );
    if let Some(url) = &admin_url {
        if !matches!(url.scheme(), "http" | "https") {
            errors.push(format!(
                "stream.admin_url must use http or https (got `{}`)",
                url.scheme()
            ));
        }
    }
    let service_url = required_url(
        "stream.service_url",
        raw.service_url,
        DEFAULT_STREAM_SERVICE_URL,
        errors,
    );
    let tenant = required_text("stream.tenant", raw.tenant, DEFAULT_STREAM_TENANT, errors);

    Some(StreamSettings {
        admin_url: admin_url?,
        service_url: service_url?,
        tenant: tenant?,
    })
}

fn resolve_sql(raw: RawSqlSection, errors: &mut Vec<String>) -> Option<SqlSettings> {
    if !raw.enabled.unwrap_or(true) {
        return None;
    }

    let host = required_text("sql.host", raw.host, DEFAULT_SQL_HOST, errors);
    let port = resolve_port("sql.port", raw.port, DEFAULT_SQL_PORT, errors);
    let user = required_text("sql.user", raw.user, DEFAULT_SQL_USER, errors);
    let database = required_text("sql.database", raw.database, DEFAULT_SQL_DATABASE, errors);

    let min_pool = raw.min_pool.unwrap_or(DEFAULT_SQL_MIN_POOL);
    let max_pool = raw.max_pool.unwrap_or(DEFAULT_SQL_MAX_POOL);
    if max_pool == 0 {
        errors.push("sql.max_pool must be at least 1".to_string());
    }
    if min_pool > max_pool {
        errors.push(format!(
            "sql.min_pool ({min_pool}) must not exceed sql.max_pool ({max_pool})"
        ));
    }

    let ssl_mode = match raw.ssl_mode {
        None => SslMode::default(),
        Some(value) => SslMode::parse(&value).unwrap_or_else(|| {
            errors.push(format!(
                "sql.ssl_mode must be one of disable, allow, prefer, require, verify-ca, verify-full (got `{}`)",
                value.trim()
            ));
            SslMode::default()
        }),
    };

    Some(SqlSettings {
        host: host?,
        port,
        user: user?,
        password: raw.password.filter(|value| !value.is_empty()),
        database: database?,
        min_pool,
        max_pool,
        ssl_mode,
    })
}

fn resolve_kv(raw: RawKvSection, errors: &mut Vec<String>) -> Option<KvSettings> {
    if !raw.enabled.unwrap_or(true) {
        return None;
    }

    let host = required_text("kv.host", raw.host, DEFAULT_KV_HOST, errors);
    let port = resolve_port("kv.port", raw.port, DEFAULT_KV_PORT, errors);
    let index = raw.index.unwrap_or(0);
    if index < 0 {
        errors.push(format!("kv.index must not be negative (got {index})"));
    }

    Some(KvSettings {
        host: host?,
        port,
        index: index.max(0),
        password: raw.password.filter(|value| !value.is_empty()),
    })
}

fn positive_duration(
    label: &str,
    raw: Option<String>,
    default: Duration,
    errors: &mut Vec<String>,
) -> Duration {
    let Some(value) = raw else {
        return default;
    };

    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.push(format!("{label} must be a non-empty duration string"));
        return default;
    }

    match parse_duration(trimmed) {
        Ok(duration) if duration.is_zero() => {
            errors.push(format!("{label} must be greater than zero"));
            default
        }
        Ok(duration) => duration,
        Err(_) => {
            errors.push(format!("{label} must be a valid positive duration (got `{trimmed}`)"));
            default
        }
    }
}

fn resolve_port(label: &str, raw: Option<u16>, default: u16, errors: &mut Vec<String>) -> u16 {
    match raw {
        None => default,
        Some(0) => {
            errors.push(format!("{label} must be greater than zero"));
            default
        }
        Some(port) => port,
    }
}

fn non_empty_or_default(
    label: &str,
    raw: Option<String>,
    default: &str,
    errors: &mut Vec<String>,
) -> String {
    match raw {
        None => default.to_string(),
        Some(value) if value.trim().is_empty() => {
            errors.push(format!("{label} must not be empty"));
            default.to_string()
        }
        Some(value) => value.trim().to_string(),
    }
}

fn required_text(
    label: &str,
    raw: Option<String>,
    default: &str,
    errors: &mut Vec<String>,
) -> Option<String> {
    match raw {
        None => Some(default.to_string()),
        Some(value) if value.trim().is_empty() => {
            errors.push(format!("{label} is required when the dependency is enabled"));
            None
        }
        Some(value) => Some(value.trim().to_string()),
    }
}

fn required_url(
    label: &str,
    raw: Option<String>,
    default: &str,
    errors: &mut Vec<String>,
) -> Option<Url> {
    let text = required_text(label, raw, default, errors)?;
    parse_url(label, &text, errors)
}

fn parse_url(label: &str, value: &str, errors: &mut Vec<String>) -> Option<Url> {
    match Url::parse(value.trim()) {
        Ok(url) => Some(url),
        Err(err) => {
            errors.push(format!("{label} must be a valid URL (got `{}`): {err}", value.trim()));
            None
        }
    }
}
