use crate::worker::config::{EnqueueConfig, WorkerConfig};
use serde_derive::{Deserialize, Serialize};
use serde_with::serde_as;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;
use strum_macros::{EnumString, IntoStaticStr};
#[cfg(feature = "worker-redis")]
use url::Url;
use validator::{Validate, ValidationError};

#[serde_as]
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct WorkerServiceConfig {
    /// Which broker the producer and the worker pool talk to.
    #[serde(default)]
    pub backend: BrokerBackend,

    /// The maximum number of task handlers that run at the same time, across all queues.
    ///
    /// The email task is IO-bound (it mostly waits on the mail relay), so this can be quite a bit
    /// higher than the CPU count.
    #[validate(range(min = 1))]
    pub num_workers: u32,

    /// Queue name to relative weight. A queue with weight 6 is polled roughly twice as often as a
    /// queue with weight 3 while both have tasks ready.
    #[validate(custom(function = "validate_queue_weights"))]
    pub queues: BTreeMap<String, u32>,

    /// Always poll queues in descending weight order instead of interleaving them. Lower weight
    /// queues are then only served when every higher weight queue is empty, so this can starve
    /// them under sustained load.
    #[serde(default)]
    pub strict_priority: bool,

    /// How long to wait for in-flight tasks to finish after a shutdown signal before abandoning
    /// them.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub drain_timeout: Duration,

    /// How long a dequeued task stays invisible to other consumers. A task that is neither acked
    /// nor retried within this window is redelivered. Should be longer than the longest expected
    /// handler run.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub visibility_timeout: Duration,

    #[serde(default)]
    #[validate(nested)]
    pub queue_fetch_config: QueueFetchConfig,

    /// The default enqueue config if not overridden by a worker.
    #[serde(default)]
    #[validate(nested)]
    pub enqueue_config: EnqueueConfig,

    /// The default worker config if not overridden by a worker.
    #[serde(default)]
    #[validate(nested)]
    pub worker_config: WorkerConfig,

    #[cfg(feature = "worker-redis")]
    #[serde(default)]
    #[validate(nested)]
    pub redis: Option<RedisConfig>,
}

fn validate_queue_weights(queues: &BTreeMap<String, u32>) -> Result<(), ValidationError> {
    if queues.is_empty() {
        return Err(ValidationError::new("queues-empty")
            .with_message(Cow::from("At least one queue must be configured")));
    }

    let zero_weight = queues
        .iter()
        .filter(|(_, weight)| **weight == 0)
        .map(|(name, _)| name.clone())
        .collect::<Vec<_>>();
    if !zero_weight.is_empty() {
        let mut err = ValidationError::new("queue-weight-zero")
            .with_message(Cow::from("Queue weights must be positive"));
        err.add_param(Cow::from("queues"), &zero_weight);
        return Err(err);
    }

    Ok(())
}

#[derive(
    Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
#[non_exhaustive]
pub enum BrokerBackend {
    /// Redis, shared by the web process and the worker process.
    #[default]
    Redis,
    /// Process-local queues. Tasks are lost on exit, and a producer in another process can't
    /// reach them. Intended for tests and local development.
    InMemory,
}

#[serde_as]
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
#[non_exhaustive]
pub struct QueueFetchConfig {
    /// How long the worker pool waits before polling again when every queue was empty.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub empty_delay: Duration,

    /// How long the worker pool waits before polling again after the broker returned an error.
    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub error_delay: Duration,
}

impl Default for QueueFetchConfig {
    fn default() -> Self {
        Self {
            empty_delay: Duration::from_millis(500),
            error_delay: Duration::from_secs(5),
        }
    }
}

#[cfg(feature = "worker-redis")]
#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct RedisConfig {
    pub uri: Url,

    /// Prefix for every key the broker writes, so several apps can share one Redis.
    #[serde(default = "RedisConfig::default_key_prefix")]
    #[validate(length(min = 1))]
    pub key_prefix: String,

    /// The maximum number of pooled connections. Defaults to `num-workers` plus one, so a
    /// busy pool never waits on a connection.
    #[serde(default)]
    pub max_connections: Option<u32>,

    /// The minimum number of idle connections to keep in the pool.
    #[serde(default)]
    pub min_idle: Option<u32>,

    /// Maximum number of tasks kept in the dead set. Oldest entries are trimmed first.
    #[serde(default = "RedisConfig::default_dead_set_limit")]
    pub dead_set_limit: u32,
}

#[cfg(feature = "worker-redis")]
impl RedisConfig {
    fn default_key_prefix() -> String {
        "courier".to_owned()
    }

    fn default_dead_set_limit() -> u32 {
        10_000
    }
}
