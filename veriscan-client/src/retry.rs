//! Bounded exponential-backoff retry around a [`Transport`].

use crate::config::RetryConfig;
use crate::transport::{ApiResponse, Transport};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use veriscan_core::{ApiError, RequestDescriptor};

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: MAX_RETRY_DELAY,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// `min(2^retry_count * base, max)`, where `retry_count` has already been
    /// incremented for the upcoming attempt.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Retry only when no response arrived or the server failed (5xx), and
    /// only while budget remains. A 401 is rejected before anything else.
    pub fn should_retry(&self, request: &RequestDescriptor, error: &ApiError) -> bool {
        if error.is_unauthorized() {
            return false;
        }
        request.retries_remaining() > 0 && error.is_retryable()
    }
}

/// Sequential retry loop. Never two attempts in flight for one descriptor.
pub struct RetryingTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryingTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `request`, retrying per [`RetryPolicy`]. On exhaustion the last
    /// underlying error is returned unchanged. Cancelling `cancel` aborts the
    /// in-flight attempt or pending backoff and yields [`ApiError::Cancelled`].
    pub async fn execute(
        &self,
        mut request: RequestDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse, ApiError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                result = self.inner.send(&request) => result,
            };

            let error = match attempt {
                Ok(response) => {
                    if request.retry_count > 0 {
                        debug!(
                            url = %request.url,
                            retries = request.retry_count,
                            "Request succeeded after retry"
                        );
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            if !self.policy.should_retry(&request, &error) || !request.record_retry() {
                return Err(error);
            }

            let delay = self.policy.delay_for(request.retry_count);
            warn!(
                url = %request.url,
                retry = request.retry_count,
                max_retries = request.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying request"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
