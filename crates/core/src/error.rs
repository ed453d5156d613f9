use thiserror::Error;

/// Errors raised while parsing patterns or decoding trigger messages.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid blob path pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid blob path '{0}'")]
    InvalidPath(String),

    #[error("invalid blob trigger message: {0}")]
    InvalidMessage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
