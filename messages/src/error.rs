use thiserror::Error;

/// Decoding failures for election messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown payload type {0}")]
    UnknownPayload(u8),

    #[error("vote carries {count} hashes, at most {max} allowed")]
    TooManyHashes { count: usize, max: usize },

    #[error("vote carries no hashes")]
    EmptyVote,

    #[error("embedded block does not decode: {0}")]
    Block(String),

    #[error("embedded block type {declared} does not match decoded {decoded}")]
    BlockTypeMismatch { declared: u8, decoded: u8 },
}
