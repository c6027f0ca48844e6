use crate::{events::DecodeError, storage::StorageError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Internal error: {0}")]
    Internal(String),
}
