use serde_derive::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none};
use std::time::Duration;
use strum_macros::{EnumString, IntoStaticStr};
use validator::Validate;

/// Options used when enqueuing a task. Defaults come from the app config and can be overridden
/// per worker via [`crate::worker::Worker::enqueue_config`].
#[skip_serializing_none]
#[derive(Debug, Default, Clone, Validate, Serialize, Deserialize, bon::Builder)]
#[serde(default, rename_all = "kebab-case")]
#[non_exhaustive]
pub struct EnqueueConfig {
    /// The queue tasks are placed on. Must be one of the queues in `service.worker.queues`.
    #[builder(into)]
    #[validate(length(min = 1))]
    pub queue: Option<String>,

    /// Overrides the retry limit stored on each task.
    pub max_retries: Option<u32>,
}

impl EnqueueConfig {
    /// Fill any option not set on `self` from `defaults`.
    pub fn or(&self, defaults: &EnqueueConfig) -> EnqueueConfig {
        EnqueueConfig {
            queue: self.queue.clone().or_else(|| defaults.queue.clone()),
            max_retries: self.max_retries.or(defaults.max_retries),
        }
    }
}

/// Options used when handling a task. Defaults come from the app config and can be overridden
/// per worker via [`crate::worker::Worker::worker_config`].
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Default, Clone, Validate, Serialize, Deserialize, bon::Builder)]
#[serde(default, rename_all = "kebab-case")]
#[non_exhaustive]
pub struct WorkerConfig {
    /// Enforce `max-duration` on handlers. A handler that runs over is treated as a retryable
    /// failure.
    pub timeout: Option<bool>,

    #[serde_as(as = "Option<serde_with::DurationMilliSeconds>")]
    pub max_duration: Option<Duration>,

    /// If no retry configuration is provided, either in the app config or for the worker,
    /// failed tasks are not retried.
    #[serde(flatten)]
    #[validate(nested)]
    pub retry_config: Option<RetryConfig>,
}

impl WorkerConfig {
    pub fn or(&self, defaults: &WorkerConfig) -> WorkerConfig {
        let retry_config = match (self.retry_config.as_ref(), defaults.retry_config.as_ref()) {
            (Some(retry), Some(defaults)) => Some(retry.or(defaults)),
            (retry, defaults) => retry.or(defaults).cloned(),
        };
        WorkerConfig {
            timeout: self.timeout.or(defaults.timeout),
            max_duration: self.max_duration.or(defaults.max_duration),
            retry_config,
        }
    }

    /// The duration to enforce on a handler, if any.
    pub fn enforced_max_duration(&self) -> Option<Duration> {
        if self.timeout.unwrap_or_default() {
            self.max_duration
        } else {
            None
        }
    }
}

#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Default, Clone, Validate, Serialize, Deserialize, bon::Builder)]
#[serde(default, rename_all = "kebab-case")]
#[non_exhaustive]
pub struct RetryConfig {
    /// The maximum number of times a task is redelivered after a retryable failure. Once
    /// exhausted, the task is moved to the dead set.
    pub max_retries: Option<u32>,

    /// The base delay before a retry. The [`BackoffStrategy`] scales it with each attempt.
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds>")]
    pub delay: Option<Duration>,

    /// Upper bound of a random jitter added to the base `delay`, so tasks that failed together
    /// don't all come back at the same instant.
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds>")]
    pub delay_offset: Option<Duration>,

    /// The maximum duration to delay a retry.
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds>")]
    pub max_delay: Option<Duration>,

    pub backoff_strategy: Option<BackoffStrategy>,
}

impl RetryConfig {
    pub fn or(&self, defaults: &RetryConfig) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries.or(defaults.max_retries),
            delay: self.delay.or(defaults.delay),
            delay_offset: self.delay_offset.or(defaults.delay_offset),
            max_delay: self.max_delay.or(defaults.max_delay),
            backoff_strategy: self
                .backoff_strategy
                .clone()
                .or_else(|| defaults.backoff_strategy.clone()),
        }
    }
}

#[derive(
    Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
#[non_exhaustive]
pub enum BackoffStrategy {
    /// `delay * 2^retried`
    #[default]
    Exponential,
    /// `delay * (retried + 1)`
    Linear,
    /// Always `delay`.
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_falls_back_to_defaults() {
        let defaults = WorkerConfig::builder()
            .timeout(true)
            .max_duration(Duration::from_secs(60))
            .retry_config(
                RetryConfig::builder()
                    .max_retries(5)
                    .delay(Duration::from_secs(10))
                    .build(),
            )
            .build();
        let worker = WorkerConfig::builder()
            .retry_config(RetryConfig::builder().max_retries(2).build())
            .build();

        let merged = worker.or(&defaults);

        assert_eq!(merged.enforced_max_duration(), Some(Duration::from_secs(60)));
        let retry = merged.retry_config.unwrap();
        assert_eq!(retry.max_retries, Some(2));
        assert_eq!(retry.delay, Some(Duration::from_secs(10)));
    }

    #[test]
    fn no_timeout_unless_enabled() {
        let config = WorkerConfig::builder()
            .max_duration(Duration::from_secs(60))
            .build();

        assert_eq!(config.enforced_max_duration(), None);
    }

    #[test]
    fn enqueue_config_falls_back_to_defaults() {
        let defaults = EnqueueConfig::builder().queue("default").max_retries(5).build();
        let worker = EnqueueConfig::builder().queue("critical").build();

        let merged = worker.or(&defaults);

        assert_eq!(merged.queue.as_deref(), Some("critical"));
        assert_eq!(merged.max_retries, Some(5));
    }

    #[test]
    fn flattened_retry_config() {
        let config: WorkerConfig = toml::from_str(
            r#"
            timeout = true
            max-duration = 1000
            max-retries = 3
            backoff-strategy = "linear"
            "#,
        )
        .unwrap();

        let retry = config.retry_config.unwrap();
        assert_eq!(retry.max_retries, Some(3));
        assert_eq!(retry.backoff_strategy, Some(BackoffStrategy::Linear));
    }
}
