use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EmailError {
    #[error(transparent)]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error(transparent)]
    Address(#[from] lettre::address::AddressError),

    #[error(transparent)]
    Lettre(#[from] lettre::error::Error),
}

impl From<lettre::transport::smtp::Error> for crate::error::Error {
    fn from(value: lettre::transport::smtp::Error) -> Self {
        Self::Email(EmailError::from(value))
    }
}

impl From<lettre::address::AddressError> for crate::error::Error {
    fn from(value: lettre::address::AddressError) -> Self {
        Self::Email(EmailError::from(value))
    }
}

impl From<lettre::error::Error> for crate::error::Error {
    fn from(value: lettre::error::Error) -> Self {
        Self::Email(EmailError::from(value))
    }
}
