//! Health reporting and the container health-check probe.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config;
use crate::executor::StatsSnapshot;
use crate::state::AppState;

/// Matches the 3 s timeout of the container health check.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: &'static str,
    pub language: String,
    pub languages: Vec<String>,
    pub toolchain_available: bool,
    pub data_dir_writable: bool,
    pub uid: u32,
    pub uptime_secs: u64,
    pub executions: StatsSnapshot,
}

pub async fn report(state: &AppState) -> HealthReport {
    let executor = state.executor.clone();
    let config = executor.config().clone();

    let toolchain_available = executor
        .profile_for(None)
        .map(|profile| profile.toolchain_available())
        .unwrap_or(false);
    let data_dir = config.data_dir.clone();
    let data_dir_writable = tokio::task::spawn_blocking(move || config::data_dir_writable(&data_dir))
        .await
        .unwrap_or(false);

    let status = if toolchain_available && data_dir_writable {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    };

    HealthReport {
        status,
        version: env!("CARGO_PKG_VERSION"),
        language: config.default_language.clone(),
        languages: config.languages.clone(),
        toolchain_available,
        data_dir_writable,
        uid: nix::unistd::geteuid().as_raw(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        executions: executor.stats(),
    }
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("health request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("worker reported unhealthy (HTTP {0})")]
    Unhealthy(u16),
}

/// GET `url` and succeed only on a 2xx answer.
pub async fn probe(url: &str, timeout: Duration) -> Result<(), ProbeError> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response = client.get(url).send().await?;
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(ProbeError::Unhealthy(status.as_u16()))
    }
}

/// The URL `healthcheck` probes for a worker on `port`.
pub fn local_health_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/health", port)
}
