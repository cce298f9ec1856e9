pub mod worker;

use crate::config::service::worker::WorkerServiceConfig;
use serde_derive::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct Service {
    #[validate(nested)]
    pub worker: WorkerServiceConfig,
}
