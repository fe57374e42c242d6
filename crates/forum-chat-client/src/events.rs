use tokio::sync::broadcast;

use forum_chat_shared::{Message, PeerId};

/// Changes the session publishes for the view.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A message landed in the active conversation's timeline.
    MessageAppended { peer: PeerId, message: Message },
    /// A peer's unread counter changed.
    UnreadChanged { peer: PeerId, unread: usize },
    /// The contact roster was replaced.
    RosterUpdated { count: usize },
    /// A history fetch failed; selecting the peer again retries it.
    FetchFailed { peer: PeerId, error: String },
    /// The realtime connection ended and will not come back on its own.
    RealtimeClosed,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::MessageAppended { .. } => "message-appended",
            SessionEvent::UnreadChanged { .. } => "unread-changed",
            SessionEvent::RosterUpdated { .. } => "roster-updated",
            SessionEvent::FetchFailed { .. } => "fetch-failed",
            SessionEvent::RealtimeClosed => "realtime-closed",
        }
    }
}

pub fn emit_event(events: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    let name = event.name();
    // No subscriber is not an error; the view may not be attached yet.
    if events.send(event).is_err() {
        tracing::trace!(event = name, "No subscriber for session event");
    }
}
