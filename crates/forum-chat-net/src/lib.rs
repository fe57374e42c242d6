//! Network layer of the forum chat client: the REST client with
//! transparent credential refresh and the realtime WebSocket channel.

pub mod api;
pub mod error;
pub mod realtime;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use api::{ApiClient, ApiConfig};
pub use error::{ApiError, RealtimeError};
pub use realtime::{RealtimeChannel, RealtimeConfig};
