use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Binary frame is not valid UTF-8")]
    NotUtf8,
}

/// Input rejected before it reaches the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message content is empty")]
    EmptyContent,

    #[error("Message is {len} characters long, the limit is {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("Username must be between {min} and {max} characters")]
    InvalidUsername { min: usize, max: usize },
}
