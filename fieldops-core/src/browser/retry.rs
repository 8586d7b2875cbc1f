use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Duration,
    jitter: Duration,
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    fn delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.backoff;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.backoff + Duration::from_millis(extra)
    }

    /// Runs `operation` up to `max_attempts` times.
    ///
    /// Only errors accepted by `is_retryable` trigger another attempt; any
    /// other error is returned as soon as it occurs. When attempts run out the
    /// last retryable error is returned unchanged.
    pub async fn run<F, Fut, T, P>(
        &self,
        label: &str,
        is_retryable: P,
        mut operation: F,
    ) -> BrowserResult<RetryOutcome<T>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = BrowserResult<T>>,
        P: Fn(&BrowserError) -> bool,
    {
        let mut attempt = 0usize;
        loop {
            match operation(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => {
                    attempt += 1;
                    if !is_retryable(&error) || attempt >= self.max_attempts {
                        return Err(error);
                    }
                    let delay = self.delay();
                    warn!(
                        label,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after transient failure"
                    );
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                }
            }
        }
    }
}
