//! REST client with transparent credential refresh.
//!
//! Every request carries the current access token. A 401 triggers one
//! refresh exchange and one retry of the original request; the caller sees
//! only the retry's outcome. Refreshes are single-flight: concurrent
//! requests that fail with the same expired token wait on one exchange and
//! then retry with its result.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use forum_chat_shared::constants::{DEFAULT_API_URL, DEFAULT_REQUEST_TIMEOUT_SECS};
use forum_chat_shared::protocol::{
    LoginForm, NewMessage, NewMessageByUsername, RefreshRequest, TokenResponse,
};
use forum_chat_shared::{CredentialPair, CredentialProvider, Message, Peer, PeerId};

use crate::error::ApiError;

/// Connection settings of the REST client.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL every request path is appended to.
    pub base_url: String,
    /// Per-request timeout enforced by the HTTP transport.
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// A request that can be issued again after a refresh.
struct ApiRequest {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    /// Serialises credential writes; held for the whole refresh exchange.
    refresh_gate: Mutex<()>,
}

impl ApiClient {
    pub fn new(config: &ApiConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
            refresh_gate: Mutex::new(()),
        })
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialProvider> {
        &self.credentials
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.get().is_some()
    }

    // -----------------------------------------------------------------------
    // Endpoints
    // -----------------------------------------------------------------------

    /// `GET /users/me`
    pub async fn me(&self) -> Result<Peer, ApiError> {
        self.get("/users/me").await
    }

    /// `GET /conversations/contacts`
    pub async fn contacts(&self) -> Result<Vec<Peer>, ApiError> {
        self.get("/conversations/contacts").await
    }

    /// `GET /conversations/{peer_id}`
    pub async fn history(&self, peer: PeerId) -> Result<Vec<Message>, ApiError> {
        self.get(&format!("/conversations/{peer}")).await
    }

    /// `POST /messages`; returns the message as stored by the server.
    pub async fn send_message(&self, receiver: PeerId, content: &str) -> Result<Message, ApiError> {
        let body = NewMessage {
            content: content.to_string(),
            receiver_id: receiver,
        };
        self.post("/messages", &body).await
    }

    /// `POST /messages/by-username`
    pub async fn send_message_to_username(
        &self,
        username: &str,
        content: &str,
    ) -> Result<Message, ApiError> {
        let body = NewMessageByUsername {
            content: content.to_string(),
            receiver_username: username.to_string(),
        };
        self.post("/messages/by-username", &body).await
    }

    /// Exchange a username and password for a fresh credential pair.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let form = LoginForm {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self
            .http
            .post(self.url("/auth/login"))
            .form(&form)
            .send()
            .await?;
        let token: TokenResponse = decode(response).await?;

        let _gate = self.refresh_gate.lock().await;
        self.credentials.set(token.into());
        info!(user = %username, "Logged in");
        Ok(())
    }

    /// Invalidate the session server-side (best effort) and drop the local
    /// credential pair.
    pub async fn logout(&self) {
        if self.is_authenticated() {
            if let Err(e) = self
                .post::<serde_json::Value, _>("/auth/logout", &serde_json::json!({}))
                .await
            {
                warn!(error = %e, "Server-side logout failed");
            }
        }

        let _gate = self.refresh_gate.lock().await;
        self.credentials.clear();
        info!("Logged out");
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.execute(ApiRequest {
            method: Method::GET,
            path: path.to_string(),
            body: None,
        })
        .await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.execute(ApiRequest {
            method: Method::POST,
            path: path.to_string(),
            body: Some(serde_json::to_value(body)?),
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Refresh-and-retry
    // -----------------------------------------------------------------------

    async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        let sent_with = self.credentials.get();
        let response = self.dispatch(&request, sent_with.as_ref()).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return decode(response).await;
        }

        debug!(path = %request.path, "Request unauthorized");
        let Some(fresh) = self.recover(sent_with.as_ref()).await else {
            return Err(ApiError::Unauthorized);
        };

        // Exactly one retry; a second 401 is final.
        let retry = self.dispatch(&request, Some(&fresh)).await?;
        decode(retry).await
    }

    /// Obtain credentials to retry with after a 401, refreshing at most once
    /// per expired access token.
    async fn recover(&self, failed_with: Option<&CredentialPair>) -> Option<CredentialPair> {
        let _gate = self.refresh_gate.lock().await;

        let Some(current) = self.credentials.get() else {
            debug!("No refresh token held");
            return None;
        };

        // Another request refreshed (or the user logged in) while this one
        // was waiting.
        let superseded = failed_with.map_or(true, |pair| pair.access_token != current.access_token);
        if superseded {
            debug!("Credentials already replaced, retrying");
            return Some(current);
        }

        match self.exchange_refresh(&current.refresh_token).await {
            Ok(pair) => {
                info!("Access token refreshed");
                self.credentials.set(pair.clone());
                Some(pair)
            }
            Err(e) => {
                warn!(error = %e, "Credential refresh failed, clearing credentials");
                self.credentials.clear();
                None
            }
        }
    }

    async fn exchange_refresh(&self, refresh_token: &str) -> Result<CredentialPair, ApiError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        let response = self
            .http
            .post(self.url("/auth/refresh"))
            .json(&body)
            .send()
            .await?;
        let token: TokenResponse = decode(response).await?;
        Ok(token.into())
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        credentials: Option<&CredentialPair>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path));
        if let Some(pair) = credentials {
            builder = builder.bearer_auth(&pair.access_token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }

    let body = response.bytes().await?;
    if !status.is_success() {
        return Err(ApiError::Status {
            status: status.as_u16(),
            detail: error_detail(&body),
        });
    }

    Ok(serde_json::from_slice(&body)?)
}

/// Pull `detail` out of a `{"detail": ...}` error body, or fall back to the
/// raw text.
fn error_detail(body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value.get("detail").map(|detail| match detail {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    use forum_chat_store::MemoryCredentials;
    use uuid::Uuid;

    use crate::mock::MockBackend;

    fn client_for(backend: &MockBackend, pair: Option<CredentialPair>) -> ApiClient {
        let creds: Arc<dyn CredentialProvider> = match pair {
            Some(pair) => Arc::new(MemoryCredentials::with_pair(pair)),
            None => Arc::new(MemoryCredentials::new()),
        };
        let config = ApiConfig {
            base_url: backend.base_url(),
            timeout: Duration::from_secs(5),
        };
        ApiClient::new(&config, creds).unwrap()
    }

    /// A pair the backend no longer accepts, with a refresh token it does.
    fn expired_pair(backend: &MockBackend) -> CredentialPair {
        let valid = backend.issue_tokens();
        CredentialPair::new("expired-access", valid.refresh_token)
    }

    #[tokio::test]
    async fn test_attaches_bearer_token() {
        let backend = MockBackend::start().await;
        let pair = backend.issue_tokens();
        let client = client_for(&backend, Some(pair.clone()));

        let me = client.me().await.unwrap();
        assert_eq!(me.id, backend.local_user().id);
        assert_eq!(backend.seen_tokens(), vec![pair.access_token]);
        assert_eq!(backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_unauthenticated_failure_propagates_without_refresh() {
        let backend = MockBackend::start().await;
        let client = client_for(&backend, None);

        let err = client.contacts().await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(backend.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_and_retry_is_transparent() {
        let backend = MockBackend::start().await;
        let bob = Peer::new(PeerId(Uuid::from_u128(7)), "bob");
        backend.add_contact(bob.clone());
        let client = client_for(&backend, Some(expired_pair(&backend)));

        let contacts = client.contacts().await.unwrap();
        assert_eq!(contacts, vec![bob]);
        assert_eq!(backend.refresh_calls(), 1);

        let stored = client.credentials().get().unwrap();
        assert_ne!(stored.access_token, "expired-access");
        assert_eq!(backend.seen_tokens(), vec!["expired-access".to_string(), stored.access_token]);
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_refresh() {
        let backend = MockBackend::start().await;
        backend.set_refresh_delay(Duration::from_millis(100));
        let client = client_for(&backend, Some(expired_pair(&backend)));

        let (a, b, c) = tokio::join!(
            client.get::<serde_json::Value>("/protected"),
            client.get::<serde_json::Value>("/protected"),
            client.get::<serde_json::Value>("/protected"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(backend.refresh_calls(), 1);

        let fresh = client.credentials().get().unwrap().access_token;
        let seen = backend.seen_tokens();
        assert_eq!(seen.iter().filter(|t| *t == "expired-access").count(), 3);
        assert_eq!(seen.iter().filter(|t| **t == fresh).count(), 3);
    }

    #[tokio::test]
    async fn test_refresh_failure_clears_credentials() {
        let backend = MockBackend::start().await;
        backend.set_refresh_enabled(false);
        let client = client_for(&backend, Some(expired_pair(&backend)));

        let (a, b) = tokio::join!(client.contacts(), client.me());
        assert!(a.unwrap_err().is_unauthorized());
        assert!(b.unwrap_err().is_unauthorized());
        assert!(client.credentials().get().is_none());
        assert_eq!(backend.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_only_once() {
        let backend = MockBackend::start().await;
        backend.set_reject_all(true);
        let client = client_for(&backend, Some(expired_pair(&backend)));

        let err = client.contacts().await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(backend.refresh_calls(), 1);
        assert_eq!(backend.seen_tokens().len(), 2);
        // The refreshed pair is kept; only a failed exchange clears it.
        assert!(client.credentials().get().is_some());
    }

    #[tokio::test]
    async fn test_server_error_surfaces_detail() {
        let backend = MockBackend::start().await;
        let client = client_for(&backend, Some(backend.issue_tokens()));

        let err = client
            .send_message_to_username("nobody", "hi")
            .await
            .unwrap_err();
        match err {
            ApiError::Status { status, detail } => {
                assert_eq!(status, 400);
                assert_eq!(detail, "User with this username does not exist");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_returns_server_message() {
        let backend = MockBackend::start().await;
        let client = client_for(&backend, Some(backend.issue_tokens()));
        let bob = PeerId(Uuid::from_u128(7));

        let msg = client.send_message(bob, "hello").await.unwrap();
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.receiver_id, Some(bob));
        assert_eq!(msg.author_id, backend.local_user().id);
        assert_eq!(backend.sent(), vec![msg]);
    }

    #[tokio::test]
    async fn test_login_and_logout() {
        let backend = MockBackend::start().await;
        let client = client_for(&backend, None);

        assert!(client.login("me", "wrong").await.unwrap_err().is_unauthorized());
        assert!(!client.is_authenticated());

        client.login("me", MockBackend::PASSWORD).await.unwrap();
        assert!(client.is_authenticated());
        client.me().await.unwrap();

        client.logout().await;
        assert!(!client.is_authenticated());
        assert_eq!(backend.logout_calls(), 1);
    }

    #[test]
    fn test_error_detail_extraction() {
        assert_eq!(error_detail(br#"{"detail":"Receiver not found"}"#), "Receiver not found");
        assert_eq!(error_detail(b"gateway down"), "gateway down");
    }
}
