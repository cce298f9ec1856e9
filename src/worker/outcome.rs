use crate::worker::codec::DecodingError;
use std::time::Duration;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The failure a [`crate::worker::Worker`] reports for a task. The worker decides which kind it
/// is, since only it knows whether trying again could help.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HandleError {
    /// A transient failure. The task is redelivered until it runs out of retries.
    #[error("Retryable failure: {source}")]
    Retryable {
        source: BoxError,
        /// Overrides the backoff computed from the retry config.
        delay: Option<Duration>,
    },

    /// The task can never succeed. It is moved to the dead set without being retried.
    #[error("Terminal failure: {source}")]
    Terminal { source: BoxError },
}

impl HandleError {
    pub fn retryable(source: impl Into<BoxError>) -> Self {
        Self::Retryable {
            source: source.into(),
            delay: None,
        }
    }

    pub fn retry_after(source: impl Into<BoxError>, delay: Duration) -> Self {
        Self::Retryable {
            source: source.into(),
            delay: Some(delay),
        }
    }

    pub fn terminal(source: impl Into<BoxError>) -> Self {
        Self::Terminal {
            source: source.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. })
    }
}

/// A payload that doesn't decode will never decode.
impl From<DecodingError> for HandleError {
    fn from(value: DecodingError) -> Self {
        Self::terminal(value)
    }
}

/// What happens to a delivered task once its handler is done with it.
#[derive(Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum Disposition {
    /// Remove the task from the broker for good.
    Ack,
    /// Hand the task back to the broker to be delivered again after `delay`.
    Retry { delay: Duration },
    /// The task failed terminally, or could not be routed to a handler at all.
    Discard { reason: String },
    /// The task failed on its last allowed attempt.
    Dead { reason: String },
}
