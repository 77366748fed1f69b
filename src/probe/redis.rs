use super::{DependencyDescriptor, Probe, ProbeFailure};
use crate::config::KvSettings;
use crate::error::Result;
use async_trait::async_trait;
use redis::{Client, ConnectionAddr, ConnectionInfo, ErrorKind, RedisConnectionInfo, RedisError};
use std::time::Duration;

/// Opens a connection to the key-value store and issues `PING`.
pub struct RedisProbe {
    descriptor: DependencyDescriptor,
    client: Client,
    target: String,
}

impl RedisProbe {
    pub fn new(descriptor: DependencyDescriptor, settings: &KvSettings) -> Result<Self> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(settings.host.clone(), settings.port),
            redis: RedisConnectionInfo {
                db: settings.index,
                password: settings.password.clone(),
                ..RedisConnectionInfo::default()
            },
        };
        let target = format!("redis://{}:{}/{}", settings.host, settings.port, settings.index);
        let client = Client::open(info)
            .map_err(|err| crate::err!("failed to create redis client for `{target}`: {err}"))?;

        Ok(Self {
            descriptor,
            client,
            target,
        })
    }
}

#[async_trait]
impl Probe for RedisProbe {
    fn descriptor(&self) -> &DependencyDescriptor {
        &self.descriptor
    }

    async fn check(&self, timeout: Duration) -> std::result::Result<(), ProbeFailure> {
        let ping = async {
            let mut connection = self.client.get_multiplexed_async_connection().await?;
            redis::cmd("PING")
                .query_async::<_, String>(&mut connection)
                .await
        };

        match tokio::time::timeout(timeout, ping).await {
            Ok(Ok(reply)) if reply.eq_ignore_ascii_case("PONG") => Ok(()),
            Ok(Ok(reply)) => Err(ProbeFailure::protocol(format!(
                "{} answered PING with `{reply}`",
                self.target
            ))),
            Ok(Err(err)) => Err(classify(&err, &self.target)),
            Err(_) => Err(ProbeFailure::timeout(format!(
                "{} did not answer PING in time",
                self.target
            ))),
        }
    }
}

fn classify(err: &RedisError, target: &str) -> ProbeFailure {
    if err.is_timeout() {
        ProbeFailure::timeout(format!("{target}: {err}"))
    } else if matches!(err.kind(), ErrorKind::AuthenticationFailed) {
        ProbeFailure::auth(format!("{target} rejected the credentials"))
    } else if err.is_connection_refusal() || err.is_io_error() || err.is_connection_dropped() {
        ProbeFailure::unreachable(format!("{target}: {err}"))
    } else {
        ProbeFailure::protocol(format!("{target}: {err}"))
    }
}
