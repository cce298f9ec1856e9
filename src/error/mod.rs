pub mod broker;
pub mod config;
pub mod email;
pub mod serde;
pub mod tokio;
pub mod worker;

use crate::error::broker::BrokerError;
use crate::error::config::ConfigError;
use crate::error::email::EmailError;
use crate::error::serde::SerdeError;
use crate::error::tokio::TokioError;
use crate::error::worker::WorkerError;
use thiserror::Error;

pub type CourierResult<T> = Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] validator::ValidationErrors),

    #[error(transparent)]
    Serde(#[from] SerdeError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tokio(#[from] TokioError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Process exit code to use when this error stops the worker process.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) | Error::Validation(_) => 78,
            Error::Broker(_) => 69,
            _ => 1,
        }
    }
}
