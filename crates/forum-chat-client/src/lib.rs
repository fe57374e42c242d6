//! # forum-chat-client
//!
//! Terminal client for the forum chat: session orchestration over the
//! network and store crates, configuration, session events and the
//! line-based view.

pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod view;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use error::SessionError;
pub use events::SessionEvent;
pub use session::ChatSession;

/// Install the tracing subscriber. Logs go to stderr so they do not
/// interleave with the conversation on stdout.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("forum_chat_client=debug,forum_chat_net=debug,forum_chat_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
