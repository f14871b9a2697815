//! Retry policies with exponential backoff.
//!
//! Two shapes are deliberate (see error handling notes in DESIGN.md):
//! submit-style cloud calls use a bounded policy so failures surface
//! quickly, while teardown deletes use an unbounded policy because
//! leaving orphaned billable resources is worse than a slow stop.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

/// Sleeping goes through this trait so tests can inject a recording
/// no-op clock instead of real sleeps.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// None retries until success, bounded only by process lifetime.
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub factor: u32,
    /// Ceiling for the doubled delay; without one an unbounded policy
    /// would eventually overflow `Duration`.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy for single submit-style calls: fail after `attempts`.
    pub fn bounded(attempts: u32) -> Self {
        RetryPolicy {
            max_attempts: Some(attempts),
            initial_delay: Duration::from_secs(2),
            factor: 2,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Policy for teardown deletes: keep trying until success.
    pub fn unbounded() -> Self {
        RetryPolicy {
            max_attempts: None,
            initial_delay: Duration::from_secs(2),
            factor: 2,
            max_delay: Duration::from_secs(60),
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Run an operation under this policy, sleeping with exponential
    /// backoff between attempts.
    pub async fn run<T, F, Fut>(&self, sleeper: &dyn Sleeper, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.initial_delay;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if let Some(max) = self.max_attempts {
                        if attempt >= max {
                            return Err(e.context(format!(
                                "{} failed after {} attempts",
                                what, attempt
                            )));
                        }
                    }
                    debug!(
                        operation = what,
                        attempt = attempt,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "operation failed, retrying"
                    );
                    sleeper.sleep(delay).await;
                    delay = (delay * self.factor).min(self.max_delay);
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records requested sleep durations without sleeping.
    pub struct RecordingSleeper {
        pub slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn new() -> Self {
            RecordingSleeper {
                slept: Mutex::new(Vec::new()),
            }
        }

        pub fn durations(&self) -> Vec<Duration> {
            self.slept.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
        }
    }
}
