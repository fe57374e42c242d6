use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{Message, PeerId};

/// Frames the client sends over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Sent once, right after the connection opens.
    Auth { token: String },
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decode a server push frame. The backend pushes bare message objects.
pub fn decode_server_frame(text: &str) -> Result<Message, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Same as [`decode_server_frame`] for frames delivered as binary.
pub fn decode_server_frame_bytes(data: &[u8]) -> Result<Message, ProtocolError> {
    let text = std::str::from_utf8(data).map_err(|_| ProtocolError::NotUtf8)?;
    decode_server_frame(text)
}

// ---------------------------------------------------------------------------
// REST payloads
// ---------------------------------------------------------------------------

/// `POST /messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub receiver_id: PeerId,
}

/// `POST /messages/by-username`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessageByUsername {
    pub content: String,
    pub receiver_username: String,
}

/// `POST /auth/refresh`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// `POST /auth/login` form body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

/// Token pair returned by login and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_frame_shape() {
        let frame = ClientFrame::Auth {
            token: "abc".into(),
        };
        let json: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "auth", "token": "abc"}));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_server_frame("{not json").is_err());
        assert!(decode_server_frame(r#"{"type":"ping"}"#).is_err());
        assert!(matches!(
            decode_server_frame_bytes(&[0xff, 0xfe]),
            Err(ProtocolError::NotUtf8)
        ));
    }

    #[test]
    fn test_token_response_defaults_type() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","refresh_token":"r"}"#).unwrap();
        assert_eq!(token.token_type, "bearer");
    }
}
