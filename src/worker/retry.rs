use crate::worker::config::{BackoffStrategy, RetryConfig};
use crate::worker::outcome::{Disposition, HandleError};
use crate::worker::task::Task;
use rand::Rng;
use std::time::Duration;

/// Decide what to do with `task` given the result of its handler.
///
/// The task's own `max_retries` wins over `retry_config`. Without either, a retryable failure
/// is not retried.
pub(crate) fn disposition(
    result: Result<(), HandleError>,
    task: &Task,
    retry_config: Option<&RetryConfig>,
) -> Disposition {
    let err = match result {
        Ok(()) => return Disposition::Ack,
        Err(err) => err,
    };

    match err {
        HandleError::Terminal { source } => Disposition::Discard {
            reason: source.to_string(),
        },
        HandleError::Retryable { source, delay } => {
            let max_retries = task
                .max_retries
                .or_else(|| retry_config.and_then(|config| config.max_retries))
                .unwrap_or_default();
            if task.retried >= max_retries {
                return Disposition::Dead {
                    reason: format!(
                        "Retries exhausted after {} attempts: {source}",
                        task.attempt()
                    ),
                };
            }

            let delay = delay.unwrap_or_else(|| {
                retry_config
                    .map(|config| retry_delay(config, task.retried))
                    .unwrap_or_default()
            });
            let delay = retry_config
                .and_then(|config| config.max_delay)
                .map_or(delay, |max_delay| delay.min(max_delay));
            Disposition::Retry { delay }
        }
    }
}

/// The backoff for a task that has been retried `retried` times, plus jitter of up to
/// `delay-offset`, capped at `max-delay`.
pub(crate) fn retry_delay(config: &RetryConfig, retried: u32) -> Duration {
    let delay = backoff(config, retried);

    let jitter = config
        .delay_offset
        .map(|offset| offset.as_millis().min(u64::MAX as u128) as u64)
        .filter(|offset| *offset > 0)
        .map(|offset| Duration::from_millis(rand::rng().random_range(0..=offset)))
        .unwrap_or_default();

    let delay = delay.saturating_add(jitter);
    config
        .max_delay
        .map_or(delay, |max_delay| delay.min(max_delay))
}

fn backoff(config: &RetryConfig, retried: u32) -> Duration {
    let base = config.delay.unwrap_or_default();
    let factor = match config.backoff_strategy.clone().unwrap_or_default() {
        BackoffStrategy::Exponential => 2u32.checked_pow(retried).unwrap_or(u32::MAX),
        BackoffStrategy::Linear => retried.saturating_add(1),
        BackoffStrategy::None => 1,
    };
    base.saturating_mul(factor)
}
