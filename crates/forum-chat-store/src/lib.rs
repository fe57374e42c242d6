//! # forum-chat-store
//!
//! Client-side state of the forum chat: the per-peer conversation store
//! that reconciles history, realtime pushes and sends, the contact roster,
//! and the credential pair holders.
//!
//! Nothing here performs network I/O. Conversation and roster state is
//! rebuilt from the backend every session; only the credential pair is
//! persisted.

pub mod conversations;
pub mod credentials;
pub mod roster;

mod error;

pub use conversations::{
    ConversationSnapshot, ConversationStore, Delivery, FetchPhase, FetchTicket, Selection,
};
pub use credentials::{FileCredentials, MemoryCredentials};
pub use error::StoreError;
pub use roster::{ContactRoster, RosterTicket};
