//! Store error types

use std::sync::PoisonError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not complete the operation (database, filesystem, lock)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be turned back into an association
    #[error("Corrupt record: {0}")]
    Corrupt(#[from] openid_core::Error),

    #[error("Invalid store configuration: {0}")]
    InvalidConfig(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(_: PoisonError<T>) -> Self {
        StoreError::Unavailable("lock poisoned".to_string())
    }
}
