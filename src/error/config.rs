use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// The queue weight table is unusable, e.g. empty or containing a zero weight.
    #[error("Invalid queue configuration: {0}")]
    Queue(String),

    #[error("Unable to determine environment: {0}")]
    Environment(String),

    #[error("The `{0}` broker backend is not available in this build.")]
    BackendUnavailable(String),
}

impl From<config::ConfigError> for crate::error::Error {
    fn from(value: config::ConfigError) -> Self {
        Self::Config(ConfigError::from(value))
    }
}
