//! Credential pair and the provider seam through which the API client and
//! the realtime channel read and write it.

use serde::{Deserialize, Serialize};

use crate::protocol::TokenResponse;

/// Access/refresh token pair. Both halves are always present together.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

// Tokens never end up in logs.
impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

impl From<TokenResponse> for CredentialPair {
    fn from(token: TokenResponse) -> Self {
        Self::new(token.access_token, token.refresh_token)
    }
}

/// Holder of the process-wide credential pair.
///
/// Writers are login, logout and the API client's refresh routine; any
/// request preparer may read.
pub trait CredentialProvider: Send + Sync {
    fn get(&self) -> Option<CredentialPair>;

    fn set(&self, pair: CredentialPair);

    fn clear(&self);

    fn access_token(&self) -> Option<String> {
        self.get().map(|pair| pair.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_tokens() {
        let pair = CredentialPair::new("secret-access", "secret-refresh");
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains("secret"));
    }
}
