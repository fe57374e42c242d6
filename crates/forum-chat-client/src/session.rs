//! The chat session: wires the API client, the realtime channel, the
//! conversation store and the contact roster into one event loop.
//!
//! Store and roster sit behind async mutexes. Every handler takes the lock,
//! applies its change and releases it; no lock is held across network I/O.
//! The two suspension points are the history fetch in
//! [`ChatSession::select_peer`] and the API call in
//! [`ChatSession::send_message`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use forum_chat_net::{ApiClient, ApiError, RealtimeChannel, RealtimeConfig};
use forum_chat_shared::validation::{validate_content, validate_username};
use forum_chat_shared::{CredentialProvider, Message, Peer, PeerId};
use forum_chat_store::{ContactRoster, ConversationSnapshot, ConversationStore, Delivery, Selection};

use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::events::{emit_event, SessionEvent};

/// State shared between the session handle and its background tasks.
struct SessionCore {
    api: ApiClient,
    realtime_config: RealtimeConfig,
    conversations: Mutex<ConversationStore>,
    roster: Mutex<ContactRoster>,
    /// Set while a refresh triggered by an unknown author is in flight.
    roster_pending: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

struct RealtimeLink {
    channel: RealtimeChannel,
    pump: JoinHandle<()>,
}

pub struct ChatSession {
    core: Arc<SessionCore>,
    realtime: StdMutex<Option<RealtimeLink>>,
}

impl ChatSession {
    pub fn new(
        config: &ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, SessionError> {
        let api = ApiClient::new(&config.api(), credentials)?;
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        Ok(Self {
            core: Arc::new(SessionCore {
                api,
                realtime_config: config.realtime(),
                conversations: Mutex::new(ConversationStore::new()),
                roster: Mutex::new(ContactRoster::new()),
                roster_pending: AtomicBool::new(false),
                events,
            }),
            realtime: StdMutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.events.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.core.api.is_authenticated()
    }

    /// Bring the session up: learn who we are, load the roster and open the
    /// realtime channel.
    pub async fn start(&self) -> Result<(), SessionError> {
        let me = self.core.api.me().await?;
        self.core.conversations.lock().await.set_local_id(me.id);
        info!(user = %me.display_name, id = %me.id, "Session started");

        self.core.refresh_roster().await?;
        self.connect_realtime().await
    }

    /// Open (or reopen) the realtime channel and start consuming it.
    pub async fn connect_realtime(&self) -> Result<(), SessionError> {
        self.disconnect_realtime();

        let credentials = Arc::clone(self.core.api.credentials());
        let (channel, inbound) =
            RealtimeChannel::connect(&self.core.realtime_config, credentials.as_ref()).await?;
        let pump = tokio::spawn(Arc::clone(&self.core).consume(inbound));

        *self.link() = Some(RealtimeLink { channel, pump });
        Ok(())
    }

    pub fn is_realtime_open(&self) -> bool {
        self.link()
            .as_ref()
            .map(|link| link.channel.is_open())
            .unwrap_or(false)
    }

    fn disconnect_realtime(&self) {
        if let Some(link) = self.link().take() {
            link.pump.abort();
            link.channel.close();
        }
    }

    fn link(&self) -> std::sync::MutexGuard<'_, Option<RealtimeLink>> {
        self.realtime.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Log in and start the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let username = validate_username(username)?;
        self.core.api.login(username, password).await?;
        self.start().await
    }

    /// Close the channel, invalidate the credentials and forget the
    /// previous user's conversations.
    pub async fn logout(&self) {
        self.disconnect_realtime();
        self.core.api.logout().await;
        self.core.conversations.lock().await.reset();
        self.core.roster.lock().await.reset();
    }

    pub fn shutdown(&self) {
        self.disconnect_realtime();
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Open `peer`'s conversation, fetching its history on first visit.
    ///
    /// A fetch that resolves after the user switched away is discarded; the
    /// returned snapshot then reflects whatever `peer` holds at that point.
    pub async fn select_peer(&self, peer: PeerId) -> Result<ConversationSnapshot, SessionError> {
        let selection = self.core.conversations.lock().await.select_peer(peer);
        let Selection::Switched { fetch, drained } = selection else {
            return Ok(self.snapshot(peer).await);
        };

        if drained > 0 {
            emit_event(&self.core.events, SessionEvent::UnreadChanged { peer, unread: 0 });
        }

        if let Some(ticket) = fetch {
            match self.core.api.history(peer).await {
                Ok(history) => {
                    self.core
                        .conversations
                        .lock()
                        .await
                        .complete_fetch(ticket, history);
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "History fetch failed");
                    let current = self.core.conversations.lock().await.fail_fetch(ticket);
                    if current {
                        emit_event(
                            &self.core.events,
                            SessionEvent::FetchFailed {
                                peer,
                                error: e.to_string(),
                            },
                        );
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(self.snapshot(peer).await)
    }

    /// Close the conversation view.
    pub async fn deselect(&self) {
        self.core.conversations.lock().await.deselect();
    }

    pub async fn active_peer(&self) -> Option<PeerId> {
        self.core.conversations.lock().await.active_peer()
    }

    /// Send to the active peer. The message is shown once the server has
    /// accepted it.
    pub async fn send_message(&self, content: &str) -> Result<Message, SessionError> {
        let content = validate_content(content)?;
        let peer = self
            .active_peer()
            .await
            .ok_or(SessionError::NoActivePeer)?;

        let message = self.core.api.send_message(peer, content).await?;
        debug!(peer = %peer, msg_id = %message.id, "Message sent");
        self.core.record_sent(peer, message.clone()).await;
        Ok(message)
    }

    /// Start (or continue) a conversation with a user by name.
    pub async fn send_to_username(
        &self,
        username: &str,
        content: &str,
    ) -> Result<Message, SessionError> {
        let username = validate_username(username)?;
        let content = validate_content(content)?;

        let message = self
            .core
            .api
            .send_message_to_username(username, content)
            .await?;

        if let Err(e) = self.core.refresh_roster().await {
            warn!(error = %e, "Roster refresh after send failed");
        }

        let peer = match message.receiver_id {
            Some(peer) => Some(peer),
            None => self
                .core
                .roster
                .lock()
                .await
                .find_by_name(username)
                .map(|p| p.id),
        };
        match peer {
            Some(peer) => self.core.record_sent(peer, message.clone()).await,
            None => warn!(user = %username, msg_id = %message.id, "Sent message has no known receiver"),
        }
        Ok(message)
    }

    pub async fn snapshot(&self, peer: PeerId) -> ConversationSnapshot {
        self.core.conversations.lock().await.snapshot(&peer)
    }

    pub async fn unread_counts(&self) -> HashMap<PeerId, usize> {
        self.core.conversations.lock().await.unread_counts()
    }

    // -----------------------------------------------------------------------
    // Roster
    // -----------------------------------------------------------------------

    pub async fn refresh_roster(&self) -> Result<(), SessionError> {
        Ok(self.core.refresh_roster().await?)
    }

    pub async fn contacts(&self) -> Vec<Peer> {
        self.core.roster.lock().await.peers().to_vec()
    }

    pub async fn display_name(&self, peer: PeerId) -> String {
        self.core.roster.lock().await.display_name(&peer)
    }

    /// Resolve a contact given by id or by display name.
    pub async fn resolve_peer(&self, query: &str) -> Option<PeerId> {
        if let Ok(id) = query.parse::<PeerId>() {
            return Some(id);
        }
        self.core
            .roster
            .lock()
            .await
            .find_by_name(query.trim())
            .map(|p| p.id)
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.disconnect_realtime();
    }
}

impl SessionCore {
    /// Drain the realtime channel until it dies.
    async fn consume(self: Arc<Self>, mut inbound: mpsc::Receiver<Message>) {
        while let Some(message) = inbound.recv().await {
            self.receive(message).await;
        }
        warn!("Realtime channel ended; no further pushes will arrive");
        emit_event(&self.events, SessionEvent::RealtimeClosed);
    }

    async fn receive(self: &Arc<Self>, message: Message) {
        let delivery = self
            .conversations
            .lock()
            .await
            .receive_realtime(message.clone());

        let peer = match delivery {
            Delivery::Appended { peer } => {
                emit_event(&self.events, SessionEvent::MessageAppended { peer, message });
                peer
            }
            Delivery::Queued { peer, unread } => {
                emit_event(&self.events, SessionEvent::UnreadChanged { peer, unread });
                peer
            }
            Delivery::Duplicate { .. } | Delivery::Unroutable => return,
        };

        if self.roster.lock().await.contains(&peer) {
            return;
        }
        if self.roster_pending.swap(true, Ordering::AcqRel) {
            debug!(peer = %peer, "Roster refresh already in flight");
            return;
        }

        info!(peer = %peer, "Message from a peer outside the roster");
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let result = core.refresh_roster().await;
            core.roster_pending.store(false, Ordering::Release);
            if let Err(e) = result {
                warn!(error = %e, "Roster refresh failed");
            }
        });
    }

    async fn record_sent(&self, peer: PeerId, message: Message) {
        let mut conversations = self.conversations.lock().await;
        let inserted = conversations.record_sent(peer, message.clone());
        let active = conversations.active_peer() == Some(peer);
        drop(conversations);

        if inserted && active {
            emit_event(&self.events, SessionEvent::MessageAppended { peer, message });
        }
    }

    async fn refresh_roster(&self) -> Result<(), ApiError> {
        let ticket = self.roster.lock().await.begin_refresh();
        let peers = self.api.contacts().await?;

        let mut roster = self.roster.lock().await;
        if roster.apply_refresh(ticket, peers) {
            let count = roster.len();
            drop(roster);
            emit_event(&self.events, SessionEvent::RosterUpdated { count });
        }
        Ok(())
    }
}
