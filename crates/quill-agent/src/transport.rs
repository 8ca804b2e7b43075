//! Transport helpers: retries around request setup and cancellation

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use quill_ai::{ByteStream, Error, Result, SendOptions, Transport, Turn};
use tokio_util::sync::CancellationToken;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Wraps a transport and retries failed request setup.
///
/// Only `send` is retried. Once the body stream has been handed out, errors
/// while reading it are passed through, so no delta is ever delivered twice.
pub struct RetryTransport {
    inner: Arc<dyn Transport>,
    config: RetryConfig,
}

impl RetryTransport {
    pub fn new(inner: Arc<dyn Transport>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl Transport for RetryTransport {
    async fn send(&self, turns: &[Turn], options: &SendOptions) -> Result<ByteStream> {
        let mut attempt = 0u32;
        loop {
            match self.inner.send(turns, options).await {
                Ok(stream) => return Ok(stream),
                Err(e) if attempt < self.config.max_retries && e.is_retryable() => {
                    let delay = self.config.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        self.config.max_retries + 1,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Run `fut` unless `cancel` fires first
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Aborted),
        out = fut => Ok(out),
    }
}
