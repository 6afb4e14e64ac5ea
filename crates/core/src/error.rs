//! Error types for the core domain.

use crate::filter::FilterError;
use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("file rejected: {0}")]
    Validation(#[from] FilterError),

    #[error("invalid file id: {0}")]
    InvalidFileId(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
