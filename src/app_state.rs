use crate::config::Settings;
use crate::readiness::HealthState;
use crate::retry::retry_after_seconds;
use std::sync::Arc;

/// Shared state exposed to management endpoints and background workers.
#[derive(Clone)]
pub struct AppState {
    pub service_name: Arc<str>,
    pub health: HealthState,
    pub retry_after_secs: u64,
}

impl AppState {
    pub fn new(settings: &Settings, health: HealthState) -> Self {
        Self {
            service_name: Arc::from(settings.service.name.as_str()),
            health,
            retry_after_secs: retry_after_seconds(settings.bootstrap.recheck_interval),
        }
    }
}
