//! Readiness probing for freshly deployed endpoints.
//!
//! A new instance answers 404 (or refuses connections) until the
//! tutorial container is pulled and serving; the prober polls with a
//! growing delay until it sees anything else. TLS certificate
//! validation is disabled on purpose: freshly provisioned hosts serve
//! self-signed certificates, and the prober only decides "up or not",
//! it never exchanges secrets. That is a trust trade-off, not an
//! oversight.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::errors::TutorboxError;
use crate::retry::Sleeper;

#[derive(Debug, Clone, Copy)]
pub struct ProbeConfig {
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each miss.
    pub factor: u32,
    /// None polls forever; the default is bounded so a wedged deploy
    /// fails with a clear error instead of hanging the terminal.
    pub max_attempts: Option<u32>,
    /// Ceiling for the doubled delay between polls.
    pub max_delay: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            initial_delay: Duration::from_secs(2),
            factor: 2,
            max_attempts: Some(60),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Probing seam for the cloud orchestrators: production uses HTTP,
/// tests script the endpoint's behavior.
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn wait_ready(&self, url: &str) -> Result<ProbeReport>;
}

pub struct HttpProber {
    config: ProbeConfig,
}

impl HttpProber {
    pub fn new(config: ProbeConfig) -> Self {
        HttpProber { config }
    }
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn wait_ready(&self, url: &str) -> Result<ProbeReport> {
        wait_until_ready(url, self.config, &crate::retry::TokioSleeper).await
    }
}

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub url: String,
    pub attempts: u32,
    pub status: StatusCode,
}

/// Poll `url` until it returns a status other than 404.
pub async fn wait_until_ready(
    url: &str,
    config: ProbeConfig,
    sleeper: &dyn Sleeper,
) -> Result<ProbeReport> {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .context("building readiness probe client")?;

    wait_until_ready_with(url, config, sleeper, || {
        let client = client.clone();
        let url = url.to_string();
        async move {
            let response = client.get(&url).send().await?;
            Ok(response.status())
        }
    })
    .await
}

/// Probe loop with an injectable status check, so tests can script the
/// endpoint's behavior without a live server.
pub async fn wait_until_ready_with<F, Fut>(
    url: &str,
    config: ProbeConfig,
    sleeper: &dyn Sleeper,
    mut check: F,
) -> Result<ProbeReport>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<StatusCode>>,
{
    info!(url = url, "waiting for endpoint to become ready");
    let mut delay = config.initial_delay;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match check().await {
            Ok(status) if status != StatusCode::NOT_FOUND => {
                info!(url = url, status = %status, attempts = attempts, "endpoint is ready");
                return Ok(ProbeReport {
                    url: url.to_string(),
                    attempts,
                    status,
                });
            }
            Ok(status) => {
                debug!(url = url, status = %status, "endpoint not ready yet");
            }
            Err(e) => {
                // Connection refused / reset while the host boots
                debug!(url = url, error = %e, "endpoint not reachable yet");
            }
        }

        if let Some(max) = config.max_attempts {
            if attempts >= max {
                return Err(TutorboxError::ReadinessTimeout {
                    url: url.to_string(),
                    attempts,
                }
                .into());
            }
        }

        sleeper.sleep(delay).await;
        delay = (delay * config.factor).min(config.max_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::testing::RecordingSleeper;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_ready_on_third_poll() {
        let sleeper = RecordingSleeper::new();
        let polls = AtomicU32::new(0);

        let report = wait_until_ready_with(
            "https://127.0.0.1:8443",
            ProbeConfig::default(),
            &sleeper,
            || {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Ok(StatusCode::NOT_FOUND)
                    } else {
                        Ok(StatusCode::OK)
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(report.attempts, 3);
        assert_eq!(report.status, StatusCode::OK);
        let slept = sleeper.durations();
        assert_eq!(slept.len(), 2);
        // Monotonically non-decreasing inter-poll delay
        assert!(slept[1] >= slept[0]);
    }

    #[tokio::test]
    async fn test_connection_errors_count_as_not_ready() {
        let sleeper = RecordingSleeper::new();
        let polls = AtomicU32::new(0);

        let report = wait_until_ready_with(
            "http://127.0.0.1",
            ProbeConfig::default(),
            &sleeper,
            || {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        anyhow::bail!("connection refused")
                    }
                    Ok(StatusCode::OK)
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(report.attempts, 2);
    }

    #[tokio::test]
    async fn test_attempt_cap_yields_timeout_error() {
        let sleeper = RecordingSleeper::new();
        let config = ProbeConfig {
            max_attempts: Some(3),
            ..ProbeConfig::default()
        };

        let result = wait_until_ready_with("http://127.0.0.1", config, &sleeper, || async {
            Ok(StatusCode::NOT_FOUND)
        })
        .await;

        let err = result.unwrap_err();
        let err = err.downcast::<TutorboxError>().unwrap();
        assert!(matches!(
            err,
            TutorboxError::ReadinessTimeout { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_poll_delay_is_capped_at_max_delay() {
        let sleeper = RecordingSleeper::new();
        let polls = AtomicU32::new(0);
        let config = ProbeConfig {
            initial_delay: Duration::from_secs(40),
            ..ProbeConfig::default()
        };

        wait_until_ready_with("http://127.0.0.1", config, &sleeper, || {
            let n = polls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Ok(StatusCode::NOT_FOUND)
                } else {
                    Ok(StatusCode::OK)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(
            sleeper.durations(),
            vec![
                Duration::from_secs(40),
                Duration::from_secs(60),
                Duration::from_secs(60),
            ]
        );
    }

    #[tokio::test]
    async fn test_non_404_error_status_is_ready() {
        // A 403 or 302 still proves the server is answering
        let sleeper = RecordingSleeper::new();
        let report = wait_until_ready_with(
            "http://127.0.0.1",
            ProbeConfig::default(),
            &sleeper,
            || async { Ok(StatusCode::FORBIDDEN) },
        )
        .await
        .unwrap();
        assert_eq!(report.attempts, 1);
    }
}
