//! `forum-chat`: terminal client for the forum chat backend.

use std::sync::Arc;

use tracing::{info, warn};

use forum_chat_client::{view, ChatSession, ClientConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forum_chat_client::init_tracing();
    info!("Starting forum-chat v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let credentials = Arc::new(config.open_credentials()?);
    let session = ChatSession::new(&config, credentials)?;

    if session.is_authenticated() {
        if let Err(e) = session.start().await {
            warn!(error = %e, "Could not resume the stored session");
            println!("! {e}");
        }
    } else {
        println!("Not logged in. Use /login <username> <password>");
    }

    view::run(&session).await?;

    session.shutdown();
    info!("Shutting down");
    Ok(())
}
