use crate::error::ProbeError;
use crate::probe::Probe;
use std::future::Future;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time;
use tracing::debug;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Attempt count and linear backoff between attempts.
///
/// After failed attempt `i` (1-indexed) the wrapper sleeps `base_delay * i`
/// before trying again. There is no sleep after the final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` below 1 is treated as 1.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Backoff after the given failed attempt, saturating at `Duration::MAX`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `op` until it returns `true` or attempts are exhausted.
    pub async fn run<F, Fut>(&self, mut op: F) -> Result<bool, ProbeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for attempt in 1..=self.max_attempts {
            if op().await {
                return Ok(true);
            }
            debug!(attempt, max_attempts = self.max_attempts, "attempt failed");
            if attempt == self.max_attempts {
                break;
            }
            let backoff = self.delay_for(attempt);
            debug!(delay_ms = backoff.as_millis() as u64, "retrying");
            time::sleep(backoff).await;
        }
        Err(ProbeError::MaxAttemptsExceeded {
            attempts: self.max_attempts,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY)
    }
}

/// Probe `addr` under `policy`, giving each attempt `timeout`.
pub async fn probe_with_retry<P>(
    probe: &P,
    addr: IpAddr,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<bool, ProbeError>
where
    P: Probe + ?Sized,
{
    policy.run(move || probe.probe(addr, timeout)).await
}
