//! Per-peer conversation state and the reconciliation of its three sources:
//! REST history, realtime pushes and the user's own sends.
//!
//! The store performs no I/O. History fetches are issued by the caller using
//! the [`FetchTicket`] handed out by [`ConversationStore::select_peer`]; a
//! completion is applied only while that ticket is still the current one for
//! its peer, so a response that resolves after the user switched away is
//! discarded.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use forum_chat_shared::{Message, MessageId, PeerId};

/// Public view of a peer's history-fetch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    /// History never fetched (or the last fetch was cancelled or failed).
    Unknown,
    /// A history fetch is in flight.
    Fetching,
    /// History merged; terminal for the session.
    Loaded,
}

/// Proof that a history fetch was issued for `peer`. Only the most recent
/// ticket of a peer is accepted on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub peer: PeerId,
    token: u64,
}

/// Result of [`ConversationStore::select_peer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The peer was already active; nothing changed.
    AlreadyActive,
    /// The peer is now active.
    Switched {
        /// Set when the caller must fetch this peer's history.
        fetch: Option<FetchTicket>,
        /// Number of queued messages moved into the timeline.
        drained: usize,
    },
}

/// Where a realtime message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Inserted into the active peer's timeline.
    Appended { peer: PeerId },
    /// Queued for an inactive peer.
    Queued { peer: PeerId, unread: usize },
    /// Already held for this peer; dropped.
    Duplicate { peer: PeerId },
    /// Own message without a receiver; no conversation to route it to.
    Unroutable,
}

impl Delivery {
    pub fn peer(&self) -> Option<PeerId> {
        match *self {
            Delivery::Appended { peer }
            | Delivery::Queued { peer, .. }
            | Delivery::Duplicate { peer } => Some(peer),
            Delivery::Unroutable => None,
        }
    }
}

/// Read-only copy of one conversation for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub peer: PeerId,
    pub active: bool,
    pub phase: FetchPhase,
    pub messages: Vec<Message>,
    pub unread: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unknown,
    Fetching { token: u64 },
    Loaded,
}

#[derive(Debug)]
struct PeerConversation {
    phase: Phase,
    /// Sorted by `(created_at, id)`.
    timeline: Vec<Message>,
    /// Arrival order.
    pending: Vec<Message>,
    /// Ids present in `timeline` or `pending`.
    seen: HashSet<MessageId>,
}

impl PeerConversation {
    fn new() -> Self {
        Self {
            phase: Phase::Unknown,
            timeline: Vec::new(),
            pending: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn phase(&self) -> FetchPhase {
        match self.phase {
            Phase::Unknown => FetchPhase::Unknown,
            Phase::Fetching { .. } => FetchPhase::Fetching,
            Phase::Loaded => FetchPhase::Loaded,
        }
    }

    /// Insert into the timeline unless the id is already held.
    fn insert(&mut self, msg: Message) -> bool {
        if !self.seen.insert(msg.id) {
            return false;
        }
        self.place(msg);
        true
    }

    /// Queue for later unless the id is already held.
    fn enqueue(&mut self, msg: Message) -> bool {
        if !self.seen.insert(msg.id) {
            return false;
        }
        self.pending.push(msg);
        true
    }

    fn place(&mut self, msg: Message) {
        // Chronological arrivals land at the end.
        let at = self
            .timeline
            .partition_point(|held| held.cmp_order(&msg) != Ordering::Greater);
        self.timeline.insert(at, msg);
    }

    fn drain_pending(&mut self) -> usize {
        let queued = std::mem::take(&mut self.pending);
        let count = queued.len();
        for msg in queued {
            self.place(msg);
        }
        count
    }
}

/// The reconciliation engine: peer id → timeline, pending queue, unread.
#[derive(Debug, Default)]
pub struct ConversationStore {
    local_id: Option<PeerId>,
    active: Option<PeerId>,
    peers: HashMap<PeerId, PeerConversation>,
    next_token: u64,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record who the local user is, so echoes of our own messages route to
    /// the receiver's conversation.
    pub fn set_local_id(&mut self, id: PeerId) {
        self.local_id = Some(id);
    }

    pub fn local_id(&self) -> Option<PeerId> {
        self.local_id
    }

    pub fn active_peer(&self) -> Option<PeerId> {
        self.active
    }

    /// The peer whose conversation `msg` belongs to.
    pub fn conversation_peer(&self, msg: &Message) -> Option<PeerId> {
        if self.local_id == Some(msg.author_id) {
            msg.receiver_id
        } else {
            Some(msg.author_id)
        }
    }

    /// Make `peer` the active conversation.
    ///
    /// Cancels the previous peer's in-flight fetch, drains `peer`'s pending
    /// queue into its timeline and hands out a fetch ticket if its history
    /// was never loaded.
    pub fn select_peer(&mut self, peer: PeerId) -> Selection {
        if self.active == Some(peer) {
            return Selection::AlreadyActive;
        }

        self.release_active();

        let token = self.next_token + 1;
        let conv = self.peers.entry(peer).or_insert_with(PeerConversation::new);

        let fetch = if conv.phase == Phase::Unknown {
            conv.phase = Phase::Fetching { token };
            Some(FetchTicket { peer, token })
        } else {
            None
        };
        if fetch.is_some() {
            self.next_token = token;
        }

        let drained = conv.drain_pending();
        self.active = Some(peer);

        debug!(
            peer = %peer,
            drained,
            fetching = fetch.is_some(),
            "Selected conversation"
        );

        Selection::Switched { fetch, drained }
    }

    /// Forget every conversation and the local id. Fetch tokens keep
    /// counting, so a ticket issued before the reset never matches again.
    pub fn reset(&mut self) {
        self.local_id = None;
        self.active = None;
        self.peers.clear();
    }

    /// Leave the current conversation without selecting another one.
    pub fn deselect(&mut self) {
        self.release_active();
    }

    fn release_active(&mut self) {
        let Some(previous) = self.active.take() else {
            return;
        };
        if let Some(conv) = self.peers.get_mut(&previous) {
            if let Phase::Fetching { token } = conv.phase {
                debug!(peer = %previous, token, "Cancelling in-flight history fetch");
                conv.phase = Phase::Unknown;
            }
        }
    }

    /// Apply a history fetch result. Returns `false` when the ticket is
    /// stale and the result was discarded.
    pub fn complete_fetch(&mut self, ticket: FetchTicket, history: Vec<Message>) -> bool {
        let Some(conv) = self.current_fetch(ticket) else {
            debug!(peer = %ticket.peer, token = ticket.token, "Discarding stale history");
            return false;
        };

        let fetched = history.len();
        let mut merged = 0;
        for msg in history {
            if conv.insert(msg) {
                merged += 1;
            }
        }
        conv.phase = Phase::Loaded;

        debug!(
            peer = %ticket.peer,
            fetched,
            duplicates = fetched - merged,
            total = conv.timeline.len(),
            "History merged"
        );
        true
    }

    /// Forget a failed fetch so the next selection retries it.
    pub fn fail_fetch(&mut self, ticket: FetchTicket) -> bool {
        match self.current_fetch(ticket) {
            Some(conv) => {
                conv.phase = Phase::Unknown;
                true
            }
            None => false,
        }
    }

    fn current_fetch(&mut self, ticket: FetchTicket) -> Option<&mut PeerConversation> {
        self.peers
            .get_mut(&ticket.peer)
            .filter(|conv| conv.phase == Phase::Fetching { token: ticket.token })
    }

    /// Route a message pushed over the realtime channel.
    pub fn receive_realtime(&mut self, msg: Message) -> Delivery {
        let Some(peer) = self.conversation_peer(&msg) else {
            debug!(msg_id = %msg.id, "Own message without receiver, dropping");
            return Delivery::Unroutable;
        };

        let is_active = self.active == Some(peer);
        let conv = self.peers.entry(peer).or_insert_with(PeerConversation::new);

        if is_active {
            if conv.insert(msg) {
                Delivery::Appended { peer }
            } else {
                Delivery::Duplicate { peer }
            }
        } else if conv.enqueue(msg) {
            Delivery::Queued {
                peer,
                unread: conv.pending.len(),
            }
        } else {
            Delivery::Duplicate { peer }
        }
    }

    /// Record the server echo of a message we sent to `peer`. Our own
    /// messages never count as unread.
    pub fn record_sent(&mut self, peer: PeerId, msg: Message) -> bool {
        self.peers
            .entry(peer)
            .or_insert_with(PeerConversation::new)
            .insert(msg)
    }

    pub fn timeline(&self, peer: &PeerId) -> &[Message] {
        self.peers
            .get(peer)
            .map(|conv| conv.timeline.as_slice())
            .unwrap_or_default()
    }

    pub fn pending(&self, peer: &PeerId) -> &[Message] {
        self.peers
            .get(peer)
            .map(|conv| conv.pending.as_slice())
            .unwrap_or_default()
    }

    pub fn unread(&self, peer: &PeerId) -> usize {
        self.pending(peer).len()
    }

    /// Unread counts of every peer that has any.
    pub fn unread_counts(&self) -> HashMap<PeerId, usize> {
        self.peers
            .iter()
            .filter(|(_, conv)| !conv.pending.is_empty())
            .map(|(peer, conv)| (*peer, conv.pending.len()))
            .collect()
    }

    pub fn phase(&self, peer: &PeerId) -> FetchPhase {
        self.peers
            .get(peer)
            .map(PeerConversation::phase)
            .unwrap_or(FetchPhase::Unknown)
    }

    pub fn snapshot(&self, peer: &PeerId) -> ConversationSnapshot {
        ConversationSnapshot {
            peer: *peer,
            active: self.active == Some(*peer),
            phase: self.phase(peer),
            messages: self.timeline(peer).to_vec(),
            unread: self.unread(peer),
        }
    }
}
