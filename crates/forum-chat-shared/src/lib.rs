//! Types shared by every forum-chat crate: peers, messages, the wire frames
//! spoken with the backend, and the credential provider seam.

pub mod constants;
pub mod credentials;
pub mod error;
pub mod protocol;
pub mod types;
pub mod validation;

pub use credentials::{CredentialPair, CredentialProvider};
pub use error::{ProtocolError, ValidationError};
pub use types::{Message, MessageId, Peer, PeerId};
