//! In-process backend for tests: the REST endpoints the client consumes and
//! the realtime socket, with knobs for expiring tokens, failing refreshes and
//! delaying history responses.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use forum_chat_shared::protocol::{
    LoginForm, NewMessage, NewMessageByUsername, RefreshRequest, TokenResponse,
};
use forum_chat_shared::{CredentialPair, Message, MessageId, Peer, PeerId};

#[derive(Debug, Clone)]
enum Push {
    Frame(String),
    Close,
}

pub struct MockState {
    local_user: Peer,
    access_token: Mutex<String>,
    refresh_token: Mutex<String>,
    token_serial: AtomicUsize,
    refresh_enabled: AtomicBool,
    refresh_delay_ms: AtomicU64,
    reject_all: AtomicBool,
    echo_sends: AtomicBool,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    contacts_calls: AtomicUsize,
    history_calls: AtomicUsize,
    contacts_delay_ms: AtomicU64,
    seen_tokens: Mutex<Vec<String>>,
    contacts: Mutex<Vec<Peer>>,
    users: Mutex<HashMap<String, Peer>>,
    history: Mutex<HashMap<PeerId, Vec<Message>>>,
    history_delay: Mutex<HashMap<PeerId, Duration>>,
    sent: Mutex<Vec<Message>>,
    clock: AtomicI64,
    ws_frames: Mutex<Vec<String>>,
    ws_connections: AtomicUsize,
    push: broadcast::Sender<Push>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockState {
    fn authorize(&self, headers: &HeaderMap) -> Result<(), StatusCode> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string)
            .ok_or(StatusCode::UNAUTHORIZED)?;

        lock(&self.seen_tokens).push(token.clone());

        if self.reject_all.load(Ordering::SeqCst) || *lock(&self.access_token) != token {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(())
    }

    fn issue(&self) -> TokenResponse {
        let n = self.token_serial.fetch_add(1, Ordering::SeqCst) + 1;
        let access = format!("access-{n}");
        let refresh = format!("refresh-{n}");
        *lock(&self.access_token) = access.clone();
        *lock(&self.refresh_token) = refresh.clone();
        TokenResponse {
            access_token: access,
            refresh_token: refresh,
            token_type: "bearer".into(),
        }
    }

    fn create_message(&self, receiver: PeerId, content: String) -> Message {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst);
        let msg = Message {
            id: MessageId(Uuid::new_v4()),
            author_id: self.local_user.id,
            receiver_id: Some(receiver),
            content,
            created_at: Utc
                .timestamp_opt(1_700_000_000 + tick, 0)
                .single()
                .unwrap_or_default(),
        };
        lock(&self.sent).push(msg.clone());
        lock(&self.history)
            .entry(receiver)
            .or_default()
            .push(msg.clone());
        if self.echo_sends.load(Ordering::SeqCst) {
            if let Ok(frame) = serde_json::to_string(&msg) {
                let _ = self.push.send(Push::Frame(frame));
            }
        }
        msg
    }
}

/// Running mock backend. The server stops when this is dropped.
pub struct MockBackend {
    state: Arc<MockState>,
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl MockBackend {
    /// Password accepted by `POST /auth/login`.
    pub const PASSWORD: &'static str = "correct horse";

    pub async fn start() -> Self {
        let (push, _) = broadcast::channel(64);
        let state = Arc::new(MockState {
            local_user: Peer::new(PeerId(Uuid::from_u128(1)), "me"),
            access_token: Mutex::new(String::new()),
            refresh_token: Mutex::new(String::new()),
            token_serial: AtomicUsize::new(0),
            refresh_enabled: AtomicBool::new(true),
            refresh_delay_ms: AtomicU64::new(0),
            reject_all: AtomicBool::new(false),
            echo_sends: AtomicBool::new(false),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            contacts_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
            contacts_delay_ms: AtomicU64::new(0),
            seen_tokens: Mutex::new(Vec::new()),
            contacts: Mutex::new(Vec::new()),
            users: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            history_delay: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            clock: AtomicI64::new(0),
            ws_frames: Mutex::new(Vec::new()),
            ws_connections: AtomicUsize::new(0),
            push,
        });

        let router = Router::new()
            .route("/protected", get(protected))
            .route("/auth/login", post(login))
            .route("/auth/refresh", post(refresh))
            .route("/auth/logout", post(logout))
            .route("/users/me", get(me))
            .route("/conversations/contacts", get(contacts))
            .route("/conversations/:peer_id", get(history))
            .route("/messages", post(send_message))
            .route("/messages/by-username", post(send_by_username))
            .route("/ws/connect", get(ws_connect))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend address");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self { state, addr, task }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws/connect", self.addr)
    }

    pub fn local_user(&self) -> Peer {
        self.state.local_user.clone()
    }

    /// Rotate the server-side token pair and return it; earlier pairs stop
    /// being accepted.
    pub fn issue_tokens(&self) -> CredentialPair {
        self.state.issue().into()
    }

    pub fn set_refresh_enabled(&self, enabled: bool) {
        self.state.refresh_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state
            .refresh_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Answer 401 to every authenticated endpoint, even with a valid token.
    pub fn set_reject_all(&self, reject: bool) {
        self.state.reject_all.store(reject, Ordering::SeqCst);
    }

    /// Push every created message back over the realtime socket.
    pub fn set_echo_sends(&self, echo: bool) {
        self.state.echo_sends.store(echo, Ordering::SeqCst);
    }

    pub fn add_contact(&self, peer: Peer) {
        self.add_user(peer.clone());
        lock(&self.state.contacts).push(peer);
    }

    /// Replace the contact list served from now on.
    pub fn set_contacts(&self, peers: Vec<Peer>) {
        for peer in &peers {
            self.add_user(peer.clone());
        }
        *lock(&self.state.contacts) = peers;
    }

    /// Delay contact list responses; the list is read after the delay.
    pub fn set_contacts_delay(&self, delay: Duration) {
        self.state
            .contacts_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Register a user reachable by username without a conversation.
    pub fn add_user(&self, peer: Peer) {
        lock(&self.state.users).insert(peer.display_name.clone(), peer);
    }

    pub fn set_history(&self, peer: PeerId, messages: Vec<Message>) {
        lock(&self.state.history).insert(peer, messages);
    }

    pub fn set_history_delay(&self, peer: PeerId, delay: Duration) {
        lock(&self.state.history_delay).insert(peer, delay);
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.state.logout_calls.load(Ordering::SeqCst)
    }

    pub fn contacts_calls(&self) -> usize {
        self.state.contacts_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.state.history_calls.load(Ordering::SeqCst)
    }

    /// Bearer tokens presented to authenticated endpoints, in arrival order.
    pub fn seen_tokens(&self) -> Vec<String> {
        lock(&self.state.seen_tokens).clone()
    }

    pub fn sent(&self) -> Vec<Message> {
        lock(&self.state.sent).clone()
    }

    /// Text frames the client sent over the realtime socket.
    pub fn ws_frames(&self) -> Vec<String> {
        lock(&self.state.ws_frames).clone()
    }

    pub fn push_raw(&self, frame: impl Into<String>) {
        let _ = self.state.push.send(Push::Frame(frame.into()));
    }

    pub fn push_message(&self, msg: &Message) {
        if let Ok(frame) = serde_json::to_string(msg) {
            self.push_raw(frame);
        }
    }

    /// Close every open realtime socket from the server side.
    pub fn disconnect_sockets(&self) {
        let _ = self.state.push.send(Push::Close);
    }

    /// Wait until `count` sockets have been accepted and subscribed.
    pub async fn wait_for_sockets(&self, count: usize) {
        self.wait_until(|state| state.ws_connections.load(Ordering::SeqCst) >= count)
            .await;
    }

    /// Wait until the client sent at least `count` frames.
    pub async fn wait_for_frames(&self, count: usize) {
        self.wait_until(|state| lock(&state.ws_frames).len() >= count)
            .await;
    }

    async fn wait_until(&self, ready: impl Fn(&MockState) -> bool) {
        for _ in 0..500 {
            if ready(&self.state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("mock backend condition not reached within 5s");
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

type Shared = State<Arc<MockState>>;

async fn protected(State(state): Shared, headers: HeaderMap) -> Response {
    match state.authorize(&headers) {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(status) => status.into_response(),
    }
}

async fn login(State(state): Shared, Form(form): Form<LoginForm>) -> Response {
    if form.password != MockBackend::PASSWORD {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "detail": "Invalid credentials" })),
        )
            .into_response();
    }
    Json(state.issue()).into_response()
}

async fn refresh(State(state): Shared, Json(req): Json<RefreshRequest>) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);

    let delay = state.refresh_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let valid = *lock(&state.refresh_token) == req.refresh_token;
    if !state.refresh_enabled.load(Ordering::SeqCst) || !valid {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(state.issue()).into_response()
}

async fn logout(State(state): Shared, headers: HeaderMap) -> Response {
    if let Err(status) = state.authorize(&headers) {
        return status.into_response();
    }
    state.logout_calls.fetch_add(1, Ordering::SeqCst);
    Json(serde_json::json!({ "msg": "Successfully logged out" })).into_response()
}

async fn me(State(state): Shared, headers: HeaderMap) -> Response {
    match state.authorize(&headers) {
        Ok(()) => Json(state.local_user.clone()).into_response(),
        Err(status) => status.into_response(),
    }
}

async fn contacts(State(state): Shared, headers: HeaderMap) -> Response {
    if let Err(status) = state.authorize(&headers) {
        return status.into_response();
    }
    state.contacts_calls.fetch_add(1, Ordering::SeqCst);

    let delay = state.contacts_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    Json(lock(&state.contacts).clone()).into_response()
}

async fn history(State(state): Shared, Path(peer_id): Path<Uuid>, headers: HeaderMap) -> Response {
    if let Err(status) = state.authorize(&headers) {
        return status.into_response();
    }
    state.history_calls.fetch_add(1, Ordering::SeqCst);

    let peer = PeerId(peer_id);
    let delay = lock(&state.history_delay).get(&peer).copied();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    let messages = lock(&state.history).get(&peer).cloned().unwrap_or_default();
    Json(messages).into_response()
}

async fn send_message(State(state): Shared, headers: HeaderMap, Json(body): Json<NewMessage>) -> Response {
    if let Err(status) = state.authorize(&headers) {
        return status.into_response();
    }
    let msg = state.create_message(body.receiver_id, body.content);
    (StatusCode::CREATED, Json(msg)).into_response()
}

async fn send_by_username(
    State(state): Shared,
    headers: HeaderMap,
    Json(body): Json<NewMessageByUsername>,
) -> Response {
    if let Err(status) = state.authorize(&headers) {
        return status.into_response();
    }
    let receiver = lock(&state.users).get(&body.receiver_username).map(|p| p.id);
    let Some(receiver) = receiver else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "detail": "User with this username does not exist" })),
        )
            .into_response();
    };
    let msg = state.create_message(receiver, body.content);
    (StatusCode::CREATED, Json(msg)).into_response()
}

async fn ws_connect(State(state): Shared, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: Arc<MockState>) {
    let mut pushes = state.push.subscribe();
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    let (mut tx, mut rx) = socket.split();

    loop {
        tokio::select! {
            incoming = rx.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    lock(&state.ws_frames).push(text);
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            push = pushes.recv() => match push {
                Ok(Push::Frame(frame)) => {
                    if tx.send(WsMessage::Text(frame)).await.is_err() {
                        break;
                    }
                }
                Ok(Push::Close) => {
                    let _ = tx.send(WsMessage::Close(None)).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
