#![allow(clippy::result_large_err)]

pub mod app;
pub mod app_state;
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod management;
pub mod metrics;
pub mod probe;
pub mod readiness;
pub mod retry;
pub mod telemetry;
