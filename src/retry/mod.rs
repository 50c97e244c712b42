//! Bounded exponential-backoff retry with filter and failure hooks.

use crate::errors::FlowstateError;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Decides whether a failure is retryable. Absent means "retry".
pub type RetryFilter =
    Arc<dyn Fn(&RetryPolicy, &CurrentRetryState, &FlowstateError) -> bool + Send + Sync>;

/// Jitter applied to each backoff delay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JitterStrategy {
    /// No jitter; sleep the computed delay exactly.
    #[default]
    None,
    /// Sleep a uniform duration in `[0, delay]`.
    Full,
    /// Sleep a uniform duration in `[delay/2, delay]`.
    Equal,
}

impl JitterStrategy {
    /// Applies jitter to a delay.
    #[must_use]
    pub fn apply(&self, delay: Duration) -> Duration {
        let millis = delay.as_millis() as u64;
        match self {
            Self::None => delay,
            Self::Full => Duration::from_millis(rand::thread_rng().gen_range(0..=millis)),
            Self::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + rand::thread_rng().gen_range(0..=millis - half))
            }
        }
    }
}

/// Mutable state threaded through one retry loop.
#[derive(Debug, Clone)]
pub struct CurrentRetryState {
    /// 1-based index of the attempt currently running.
    pub attempt: u32,
    /// The delay that will precede the next attempt.
    pub current_delay: Duration,
    /// Failures accumulated so far, in attempt order.
    pub failures: Vec<FlowstateError>,
}

/// Bounded exponential-backoff retry policy.
///
/// Cancellation is never retried, regardless of the filter.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_multiplier: f64,
    filter: Option<RetryFilter>,
    jitter: JitterStrategy,
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least one.
    #[must_use]
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff_multiplier,
            filter: None,
            jitter: JitterStrategy::None,
        }
    }

    /// Sets the retryability filter.
    #[must_use]
    pub fn with_filter(
        mut self,
        filter: impl Fn(&RetryPolicy, &CurrentRetryState, &FlowstateError) -> bool
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the attempt bound.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay before the second attempt.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Returns the per-attempt delay multiplier.
    #[must_use]
    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Runs the block under this policy.
    ///
    /// # Errors
    ///
    /// The block's own error when the filter rejects a retry or the
    /// failure is a cancellation; `ExceededRetryAttempts` with every
    /// accumulated failure when attempts run out.
    pub async fn retry<T, F, Fut>(&self, block: F) -> Result<T, FlowstateError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, FlowstateError>>,
    {
        self.controlled_retry(block, |_, _, _| Ok(())).await
    }

    /// Runs the block under this policy with an explicit failure
    /// callback, invoked for every retryable failure before the
    /// backoff sleep. The callback may cancel further retries by
    /// returning an error, which propagates unchanged.
    ///
    /// # Errors
    ///
    /// See [`RetryPolicy::retry`]; additionally whatever the failure
    /// callback returns.
    pub async fn controlled_retry<T, F, Fut, H>(
        &self,
        mut block: F,
        on_failure: H,
    ) -> Result<T, FlowstateError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, FlowstateError>>,
        H: Fn(&RetryPolicy, &CurrentRetryState, &FlowstateError) -> Result<(), FlowstateError>,
    {
        let mut state = CurrentRetryState {
            attempt: 1,
            current_delay: self.initial_delay,
            failures: Vec::new(),
        };

        loop {
            match block().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if err.is_cancellation() {
                        return Err(err);
                    }

                    // The filter is consulted on every attempt, the
                    // last included; a rejected failure rethrows
                    // verbatim rather than exhausting.
                    if let Some(filter) = &self.filter {
                        if !filter(self, &state, &err) {
                            return Err(err);
                        }
                    }

                    if state.attempt >= self.max_attempts {
                        state.failures.push(err);
                        return Err(FlowstateError::ExceededRetryAttempts {
                            failures: state.failures,
                        });
                    }

                    on_failure(self, &state, &err)?;

                    debug!(
                        attempt = state.attempt,
                        delay_ms = state.current_delay.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    tokio::time::sleep(self.jitter.apply(state.current_delay)).await;

                    state.attempt += 1;
                    state.current_delay = scale_delay(state.current_delay, self.backoff_multiplier);
                    state.failures.push(err);
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("has_filter", &self.filter.is_some())
            .field("jitter", &self.jitter)
            .finish()
    }
}

/// Multiplies a delay, rounding to the nearest millisecond.
fn scale_delay(delay: Duration, multiplier: f64) -> Duration {
    let millis = delay.as_millis() as f64 * multiplier;
    Duration::from_millis(millis.round() as u64)
}
