//! Error type for the fundamental types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown block type: {0}")]
    UnknownBlockType(u8),
}
