use thiserror::Error;

use forum_chat_net::{ApiError, RealtimeError};
use forum_chat_shared::ValidationError;
use forum_chat_store::StoreError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Credential storage error: {0}")]
    Store(#[from] StoreError),

    #[error("No conversation selected")]
    NoActivePeer,

    #[error("Unknown contact: {0}")]
    UnknownPeer(String),
}

impl SessionError {
    /// Whether the user has to log in again.
    pub fn needs_login(&self) -> bool {
        matches!(self, SessionError::Api(e) if e.is_unauthorized())
    }
}
