use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokioError {
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl From<tokio::task::JoinError> for crate::error::Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Tokio(TokioError::from(value))
    }
}
