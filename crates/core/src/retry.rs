//! Bounded polling with exponential backoff
//!
//! Used where the engine CLI has to be asked repeatedly until a container
//! reaches a state, for example waiting for a created container to start
//! before following its output.

use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Jitter applied to each computed delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JitterStrategy {
    /// Random delay between 0 and the computed delay
    #[default]
    FullJitter,
    /// Half the computed delay plus a random half
    EqualJitter,
}

/// Backoff schedule
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: JitterStrategy::default(),
        }
    }
}

impl RetryConfig {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        jitter: JitterStrategy,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            jitter,
        }
    }

    /// Delay before retry number `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        self.jittered(self.capped_delay(attempt), &mut fastrand::Rng::new())
    }

    /// Exponential delay `base * 2^attempt`, capped at `max_delay`
    fn capped_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u128.saturating_pow(attempt);
        let millis = self
            .base_delay
            .as_millis()
            .saturating_mul(factor)
            .min(self.max_delay.as_millis());
        Duration::from_millis(millis as u64)
    }

    fn jittered(&self, delay: Duration, rng: &mut fastrand::Rng) -> Duration {
        let millis = delay.as_millis() as u64;
        match self.jitter {
            JitterStrategy::FullJitter => Duration::from_millis(rng.u64(0..=millis)),
            JitterStrategy::EqualJitter => {
                let half = millis / 2;
                Duration::from_millis(half + rng.u64(0..=half))
            }
        }
    }
}

/// Whether a failed attempt should be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Stop,
}

/// Error classifier function type
pub type ErrorClassifier<E> = fn(&E) -> RetryDecision;

/// Retry every error
pub fn default_classifier<E>(_error: &E) -> RetryDecision {
    RetryDecision::Retry
}

/// Run `operation` until it succeeds, the classifier says stop, or the
/// attempts run out
#[instrument(level = "debug", skip(operation, classify_error))]
pub async fn retry_async<T, E, Fut, Op>(
    config: &RetryConfig,
    operation: Op,
    classify_error: ErrorClassifier<E>,
) -> std::result::Result<T, E>
where
    Op: Fn() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Debug,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("Operation succeeded on attempt {}", attempt);
                }
                return Ok(result);
            }
            Err(error) => {
                if classify_error(&error) == RetryDecision::Stop {
                    debug!("Not retrying terminal error: {:?}", error);
                    return Err(error);
                }
                if attempt >= config.max_attempts {
                    warn!(
                        "All {} attempts exhausted, final error: {:?}",
                        config.max_attempts + 1,
                        error
                    );
                    return Err(error);
                }

                let delay = config.calculate_delay(attempt);
                debug!(
                    "Attempt {} failed ({:?}), retrying in {:?}",
                    attempt, error, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
