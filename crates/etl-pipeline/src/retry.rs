//! Retry policy for remote calls.
//!
//! Every call into the relational source, the state store and the search
//! index goes through [`RetryPolicy::run`] with a predicate that decides
//! which errors are worth retrying. Anything else returns immediately.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use etl_types::SyncSettings;

/// Exponential backoff without jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial: Duration,
    /// Multiplier applied after each failure
    pub factor: f64,
    /// Delay ceiling
    pub max_interval: Duration,
    /// Give up after this many attempts; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            factor: 2.0,
            max_interval: Duration::from_secs(10),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            initial: Duration::from_millis(settings.backoff_initial_ms),
            factor: settings.backoff_factor,
            max_interval: Duration::from_millis(settings.backoff_max_ms),
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial,
            initial_interval: self.initial,
            randomization_factor: 0.0,
            multiplier: self.factor,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// the attempt limit is reached.
    pub async fn run<T, E, F, Fut, P>(&self, what: &str, is_transient: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut backoff = self.backoff();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !is_transient(&e) => return Err(e),
                Err(e) => {
                    if self.max_attempts.is_some_and(|max| attempts >= max) {
                        error!(operation = %what, attempts, error = %e, "Max retries exceeded");
                        return Err(e);
                    }
                    match backoff.next_backoff() {
                        Some(delay) => {
                            warn!(
                                operation = %what,
                                attempt = attempts,
                                error = %e,
                                retry_in_ms = delay.as_millis() as u64,
                                "Transient failure, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(operation = %what, error = %e, "Backoff exhausted");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}
