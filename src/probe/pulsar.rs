use super::{DependencyDescriptor, Probe, ProbeFailure};
use crate::config::{redact_url, StreamSettings};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use url::Url;

/// Calls the admin API's tenant resource, which needs a live broker and metadata store.
pub struct PulsarAdminProbe {
    descriptor: DependencyDescriptor,
    client: reqwest::Client,
    tenant_url: Url,
    display_url: String,
}

impl PulsarAdminProbe {
    pub fn new(descriptor: DependencyDescriptor, settings: &StreamSettings) -> Result<Self> {
        let tenant_url = tenant_url(&settings.admin_url, &settings.tenant)?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("readygate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| crate::err!("failed to build admin API client: {err}"))?;

        Ok(Self {
            descriptor,
            client,
            display_url: redact_url(&tenant_url),
            tenant_url,
        })
    }
}

#[async_trait]
impl Probe for PulsarAdminProbe {
    fn descriptor(&self) -> &DependencyDescriptor {
        &self.descriptor
    }

    async fn check(&self, timeout: Duration) -> std::result::Result<(), ProbeFailure> {
        let response = self
            .client
            .get(self.tenant_url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| classify_transport_error(&err, &self.display_url))?;

        classify_status(response.status(), &self.display_url)
    }
}

fn tenant_url(admin_url: &Url, tenant: &str) -> Result<Url> {
    crate::ensure_err!(!tenant.trim().is_empty(), "stream.tenant must not be empty");
    crate::ensure_err!(
        !tenant.contains('/'),
        "stream.tenant `{tenant}` must be a single path segment"
    );

    let mut url = admin_url.clone();
    url.path_segments_mut()
        .map_err(|_| crate::err!("stream.admin_url `{}` cannot be a base URL", admin_url))?
        .pop_if_empty()
        .extend(["admin", "v2", "tenants", tenant]);
    Ok(url)
}

fn classify_transport_error(err: &reqwest::Error, target: &str) -> ProbeFailure {
    if err.is_timeout() {
        ProbeFailure::timeout(format!("admin API {target} timed out"))
    } else if err.is_connect() {
        ProbeFailure::unreachable(format!("admin API {target} unreachable"))
    } else {
        ProbeFailure::protocol(format!("admin API {target} request failed"))
    }
}

fn classify_status(status: StatusCode, target: &str) -> std::result::Result<(), ProbeFailure> {
    match status {
        status if status.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProbeFailure::auth(format!(
            "admin API {target} rejected credentials ({status})"
        ))),
        StatusCode::NOT_FOUND => Err(ProbeFailure::protocol(format!(
            "admin API {target} does not know the tenant ({status})"
        ))),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => {
            Err(ProbeFailure::unreachable(format!(
                "admin API {target} is not serving ({status})"
            )))
        }
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => Err(ProbeFailure::timeout(
            format!("admin API {target} timed out upstream ({status})"),
        )),
        other => Err(ProbeFailure::protocol(format!(
            "admin API {target} answered {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeErrorKind;

    #[test]
    fn tenant_url_appends_admin_path() {
        let base = Url::parse("http://pulsar.internal:8080/").unwrap();
        let url = tenant_url(&base, "public").unwrap();
        assert_eq!(
            url.as_str(),
            "http://pulsar.internal:8080/admin/v2/tenants/public"
        );
    }

    #[test]
    fn tenant_url_keeps_prefix_path() {
        let base = Url::parse("https://gateway.internal/pulsar").unwrap();
        let url = tenant_url(&base, "acme").unwrap();
        assert_eq!(
            url.as_str(),
            "https://gateway.internal/pulsar/admin/v2/tenants/acme"
        );
    }

    #[test]
    fn tenant_must_be_one_segment() {
        let base = Url::parse("http://pulsar.internal:8080/").unwrap();
        assert!(tenant_url(&base, " ").is_err());
        let err = tenant_url(&base, "acme/prod").unwrap_err();
        assert!(err.to_string().contains("single path segment"));
    }

    #[test]
    fn statuses_map_to_classifications() {
        let target = "http://pulsar/admin/v2/tenants/public";
        assert!(classify_status(StatusCode::OK, target).is_ok());
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, target).unwrap_err().kind,
            ProbeErrorKind::AuthFailure
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, target)
                .unwrap_err()
                .kind,
            ProbeErrorKind::Unreachable
        );
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, target)
                .unwrap_err()
                .kind,
            ProbeErrorKind::ProtocolError
        );
    }
}
