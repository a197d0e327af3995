use crate::{Error, Forward, Link, Operation, ResultStream};
use exponential_backoff::Backoff;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

/// Largest jitter applied by a [`Retry`] link.
pub const MAX_JITTER: f32 = 0.99;

/// Configuration of a [`Retry`] link.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryConfig {
    /// Delay before the first retry.
    #[serde(default = "RetryConfig::default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound of the delay between any two attempts.
    #[serde(default = "RetryConfig::default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    /// Total number of attempts, including the first.
    #[serde(default = "RetryConfig::default_max_attempts")]
    pub max_attempts: u32,
    /// Random jitter applied to each delay, as a fraction of it.
    /// Zero (or less) disables jitter, and values of one or more are
    /// capped at [`MAX_JITTER`].
    #[serde(default = "RetryConfig::default_jitter")]
    pub jitter: f32,
}

impl RetryConfig {
    fn default_initial_delay() -> Duration {
        Duration::from_millis(300)
    }
    fn default_max_delay() -> Duration {
        Duration::from_secs(30)
    }
    fn default_max_attempts() -> u32 {
        5
    }
    fn default_jitter() -> f32 {
        0.3
    }

    fn backoff(&self) -> Backoff {
        let mut backoff = Backoff::new(u32::MAX, self.initial_delay, Some(self.max_delay));
        // Backoff requires a jitter within the open interval (0, 1).
        if self.jitter > 0.0 {
            backoff.set_jitter(self.jitter.min(MAX_JITTER));
        }
        backoff
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Self::default_initial_delay(),
            max_delay: Self::default_max_delay(),
            max_attempts: Self::default_max_attempts(),
            jitter: Self::default_jitter(),
        }
    }
}

type RetryIf = Arc<dyn Fn(&Error, &Operation) -> bool + Send + Sync>;

/// Build a Link which forwards the Operation again when its forwarded
/// stream emits an error, waiting an exponential backoff between attempts.
///
/// The failed stream is dropped before the next attempt begins. Payloads of
/// a failed attempt have already been delivered, and aren't retracted.
/// Once `max_attempts` have been made, the final error is delivered.
pub fn retry(config: RetryConfig) -> Retry {
    Retry {
        config,
        retry_if: Arc::new(|err: &Error, _op: &Operation| !err.is_configuration()),
    }
}

pub struct Retry {
    config: RetryConfig,
    retry_if: RetryIf,
}

impl Retry {
    /// Retry only errors for which `predicate` holds.
    /// By default, all errors other than chain configuration errors are retried.
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Error, &Operation) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Arc::new(predicate);
        self
    }
}

struct Attempt {
    inner: ResultStream,
    operation: Operation,
    forward: Forward,
    config: RetryConfig,
    retry_if: RetryIf,
    backoff: Backoff,
    // Number of attempts started so far.
    attempt: u32,
}

impl Link for Retry {
    fn request(&self, operation: Operation, forward: Forward) -> crate::Result<ResultStream> {
        let inner = forward.call(operation.clone())?;

        let state = Attempt {
            inner,
            operation,
            forward,
            config: self.config.clone(),
            retry_if: self.retry_if.clone(),
            backoff: self.config.backoff(),
            attempt: 1,
        };

        let stream = futures::stream::unfold(Some(state), |state| async move {
            let mut state = state?;

            loop {
                let err = match state.inner.next().await? {
                    Ok(response) => return Some((Ok(response), Some(state))),
                    Err(err) => err,
                };

                if state.attempt >= state.config.max_attempts
                    || !(state.retry_if)(&err, &state.operation)
                {
                    return Some((Err(err), Some(state)));
                }

                // The first retry waits `initial_delay`, and each later one grows from there.
                let delay = state
                    .backoff
                    .next(state.attempt - 1)
                    .unwrap_or(state.config.max_delay);

                tracing::warn!(
                    operation = state.operation.display_name(),
                    attempt = state.attempt,
                    ?delay,
                    error = %err,
                    "retrying failed operation after backoff"
                );
                // Release the failed request before waiting.
                state.inner = futures::stream::empty().boxed();
                tokio::time::sleep(delay).await;

                state.attempt += 1;
                state.inner = match state.forward.call(state.operation.clone()) {
                    Ok(inner) => inner,
                    Err(err) => return Some((Err(err), None)),
                };
            }
        });

        Ok(stream.boxed())
    }
}
