use crate::worker::codec;
use crate::worker::codec::{DecodingError, EncodingError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use serde_with::{serde_as, skip_serializing_none};
use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use uuid::Uuid;

/// The routing key of a task. Producers stamp it on each task and the worker pool uses it to look
/// up the handler, so both sides should use the constants in [`task_types`] rather than literals.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(Cow<'static, str>);

impl TaskType {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TaskType {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl From<&'static str> for TaskType {
    fn from(value: &'static str) -> Self {
        Self::from_static(value)
    }
}

/// Every task type this crate can produce. The worker checks its registry against [`ALL`] at
/// startup, see [`crate::worker::processor::builder::ProcessorBuilder::expect_task_types`].
pub mod task_types {
    use super::TaskType;

    pub const EMAIL_DELIVER: TaskType = TaskType::from_static("email:deliver");

    pub const ALL: &[TaskType] = &[EMAIL_DELIVER];
}

/// The envelope stored in the broker. The payload is opaque to everything except the handler
/// registered for `task_type`.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, bon::Builder)]
#[non_exhaustive]
pub struct Task {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,

    pub task_type: TaskType,

    #[serde_as(as = "serde_with::base64::Base64")]
    pub payload: Vec<u8>,

    /// Resolved by the [`crate::worker::enqueue::Enqueuer`] if not set.
    #[builder(into)]
    pub queue: Option<String>,

    /// Don't deliver the task before this much time has passed since it was enqueued.
    #[serde_as(as = "Option<serde_with::DurationMilliSeconds>")]
    pub delay: Option<Duration>,

    /// Overrides the `max-retries` of the worker config.
    pub max_retries: Option<u32>,

    /// The number of times the task has been handed back to the broker after a retryable
    /// failure.
    #[serde(default)]
    #[builder(default)]
    pub retried: u32,

    #[builder(default = Utc::now())]
    pub enqueued_at: DateTime<Utc>,
}

impl Task {
    /// Encode `payload` and wrap it in a new task. Does not talk to the broker.
    pub fn new<T>(task_type: TaskType, payload: &T) -> Result<Self, EncodingError>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self::builder()
            .task_type(task_type)
            .payload(codec::encode(payload)?)
            .build())
    }

    /// The 1-based number of the current delivery attempt.
    pub fn attempt(&self) -> u32 {
        self.retried.saturating_add(1)
    }

    pub fn decode_payload<T>(&self) -> Result<T, DecodingError>
    where
        T: DeserializeOwned,
    {
        codec::decode(&self.payload)
    }

    /// The same task, stamped for its next delivery.
    pub(crate) fn next_attempt(&self) -> Self {
        Self {
            retried: self.retried.saturating_add(1),
            delay: None,
            ..self.clone()
        }
    }
}
