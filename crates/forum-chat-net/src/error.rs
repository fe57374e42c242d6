use thiserror::Error;

use forum_chat_shared::ProtocolError;

/// Errors surfaced by the REST client.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authorization failed and could not be recovered by a refresh. The
    /// caller should send the user to the login flow.
    #[error("Not authorized, log in again")]
    Unauthorized,

    /// Non-success status other than 401.
    #[error("Server returned {status}: {detail}")]
    Status { status: u16, detail: String },

    /// Network failure, timeout or invalid URL.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Success status with a body that does not match the expected shape.
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

/// Errors raised while opening the realtime channel.
#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
