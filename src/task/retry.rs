//! Bounded retry with deterministic delay

use crate::error::Result;
use crate::logging::Logger;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed,
    /// `delay * 2^(n-1)` before retry `n`, capped at `max_delay`
    Exponential { max_delay: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    /// `attempts` tries with no delay between them
    pub fn new(attempts: usize) -> Self {
        Self {
            attempts: attempts.max(1),
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay to wait after the `failed`-th failed attempt (1-based)
    pub fn delay_for(&self, failed: usize) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max_delay } => {
                let shift = failed.saturating_sub(1).min(31) as u32;
                self.delay
                    .checked_mul(1u32 << shift)
                    .unwrap_or(max_delay)
                    .min(max_delay)
            }
        }
    }

    /// Run `operation` until it succeeds or the attempts are used up.
    ///
    /// Every failed attempt is reported; only the last error is returned.
    pub async fn run<F, Fut, T>(&self, name: &str, logger: &Logger, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    logger.warning(&format!(
                        "{}/{}: retry {} with error {}",
                        attempt, self.attempts, name, err
                    ));
                    if attempt >= self.attempts {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}
