//! Realtime channel: one WebSocket connection to the backend's push
//! endpoint.
//!
//! The reader task runs in the background and forwards every decoded
//! message frame, in arrival order, over a bounded mpsc channel. Malformed
//! frames are logged and dropped. When the connection dies the receiver
//! ends; there is no reconnection and nothing is replayed.

use std::sync::Mutex;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use forum_chat_shared::constants::{DEFAULT_EVENT_BUFFER, DEFAULT_WS_URL};
use forum_chat_shared::protocol::{decode_server_frame, decode_server_frame_bytes, ClientFrame};
use forum_chat_shared::{CredentialProvider, Message};

use crate::error::RealtimeError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Configuration for opening the channel.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// `ws://` or `wss://` URL of the push endpoint.
    pub url: String,
    /// Capacity of the delivery channel.
    pub buffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Handle to the open connection. Dropping it closes the connection.
pub struct RealtimeChannel {
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: JoinHandle<()>,
}

impl RealtimeChannel {
    /// Open the connection and, if credentials are held, authenticate it.
    ///
    /// Returns the channel handle and the receiver of pushed messages.
    pub async fn connect(
        config: &RealtimeConfig,
        credentials: &dyn CredentialProvider,
    ) -> Result<(Self, mpsc::Receiver<Message>), RealtimeError> {
        let (socket, _response) = connect_async(config.url.as_str()).await?;
        let (mut write, read) = socket.split();

        match credentials.access_token() {
            Some(token) => {
                let frame = ClientFrame::Auth { token }.to_json()?;
                write.send(WsMessage::Text(frame.into())).await?;
                info!(url = %config.url, "Realtime channel connected and authenticated");
            }
            None => {
                warn!(url = %config.url, "Realtime channel connected without credentials");
            }
        }

        let (event_tx, event_rx) = mpsc::channel(config.buffer.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(pump(write, read, event_tx, shutdown_rx));

        Ok((
            Self {
                shutdown: Mutex::new(Some(shutdown_tx)),
                task,
            },
            event_rx,
        ))
    }

    /// Close the connection. Safe to call any number of times.
    pub fn close(&self) {
        let sender = self
            .shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(tx) = sender {
            debug!("Realtime channel close requested");
            let _ = tx.send(());
        }
    }

    /// Whether the connection is usable: not closed by the caller and the
    /// reader task still running.
    pub fn is_open(&self) -> bool {
        let close_requested = self
            .shutdown
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none();
        !close_requested && !self.task.is_finished()
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump(
    mut write: SplitSink<Socket, WsMessage>,
    mut read: SplitStream<Socket>,
    events: mpsc::Sender<Message>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let _ = write.send(WsMessage::Close(None)).await;
                info!("Realtime channel closed");
                break;
            }

            _ = events.closed() => {
                let _ = write.send(WsMessage::Close(None)).await;
                debug!("Event receiver dropped, closing realtime channel");
                break;
            }

            frame = read.next() => {
                let decoded = match frame {
                    Some(Ok(WsMessage::Text(text))) => decode_server_frame(text.as_str()),
                    Some(Ok(WsMessage::Binary(data))) => decode_server_frame_bytes(&data),
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(frame = ?frame, "Server closed realtime channel");
                        break;
                    }
                    // Ping/pong are answered by tungstenite.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!(error = %e, "Realtime transport error");
                        break;
                    }
                    None => {
                        info!("Realtime stream ended");
                        break;
                    }
                };

                match decoded {
                    Ok(msg) => {
                        debug!(msg_id = %msg.id, author = %msg.author_id, "Realtime message");
                        if events.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Dropping malformed realtime frame"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use forum_chat_shared::{MessageId, PeerId};
    use forum_chat_store::MemoryCredentials;
    use uuid::Uuid;

    use crate::mock::MockBackend;

    fn config(backend: &MockBackend) -> RealtimeConfig {
        RealtimeConfig {
            url: backend.ws_url(),
            buffer: 16,
        }
    }

    fn msg(id: u128) -> Message {
        Message {
            id: MessageId(Uuid::from_u128(id)),
            author_id: PeerId(Uuid::from_u128(7)),
            receiver_id: Some(PeerId(Uuid::from_u128(1))),
            content: format!("push {id}"),
            created_at: Utc.timestamp_opt(1_700_000_000 + id as i64, 0).unwrap(),
        }
    }

    async fn next(rx: &mut mpsc::Receiver<Message>) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("realtime event within 5s")
    }

    #[tokio::test]
    async fn test_sends_auth_frame_on_open() {
        let backend = MockBackend::start().await;
        let creds = MemoryCredentials::with_pair(backend.issue_tokens());

        let (_channel, _rx) = RealtimeChannel::connect(&config(&backend), &creds)
            .await
            .unwrap();
        backend.wait_for_frames(1).await;

        let frame: serde_json::Value = serde_json::from_str(&backend.ws_frames()[0]).unwrap();
        assert_eq!(frame, serde_json::json!({"type": "auth", "token": "access-1"}));
    }

    #[tokio::test]
    async fn test_unauthenticated_connection_stays_open() {
        let backend = MockBackend::start().await;
        let creds = MemoryCredentials::new();

        let (channel, mut rx) = RealtimeChannel::connect(&config(&backend), &creds)
            .await
            .unwrap();
        backend.wait_for_sockets(1).await;
        backend.push_message(&msg(1));

        assert_eq!(next(&mut rx).await, Some(msg(1)));
        assert!(backend.ws_frames().is_empty());
        assert!(channel.is_open());
    }

    #[tokio::test]
    async fn test_forwards_in_order_and_drops_malformed() {
        let backend = MockBackend::start().await;
        let creds = MemoryCredentials::with_pair(backend.issue_tokens());
        let (_channel, mut rx) = RealtimeChannel::connect(&config(&backend), &creds)
            .await
            .unwrap();
        backend.wait_for_sockets(1).await;

        backend.push_message(&msg(2));
        backend.push_raw("{definitely not json");
        backend.push_raw(r#"{"type":"typing"}"#);
        backend.push_message(&msg(1));

        assert_eq!(next(&mut rx).await, Some(msg(2)));
        assert_eq!(next(&mut rx).await, Some(msg(1)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = MockBackend::start().await;
        let creds = MemoryCredentials::new();
        let (channel, mut rx) = RealtimeChannel::connect(&config(&backend), &creds)
            .await
            .unwrap();
        assert!(channel.is_open());

        channel.close();
        assert!(!channel.is_open());
        channel.close();

        assert_eq!(next(&mut rx).await, None);
        channel.close();
    }

    #[tokio::test]
    async fn test_server_close_ends_stream() {
        let backend = MockBackend::start().await;
        let creds = MemoryCredentials::new();
        let (channel, mut rx) = RealtimeChannel::connect(&config(&backend), &creds)
            .await
            .unwrap();
        backend.wait_for_sockets(1).await;

        backend.disconnect_sockets();

        assert_eq!(next(&mut rx).await, None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let creds = MemoryCredentials::new();
        let config = RealtimeConfig {
            url: "ws://127.0.0.1:1/ws/connect".into(),
            buffer: 4,
        };
        let result = RealtimeChannel::connect(&config, &creds).await;
        assert!(matches!(result, Err(RealtimeError::Transport(_))));
    }
}
