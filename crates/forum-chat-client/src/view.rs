//! Line-based terminal front-end.
//!
//! Plain lines are sent to the active conversation; lines starting with `/`
//! are commands. Session events are printed as they arrive.

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use forum_chat_shared::{Message, PeerId};

use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::session::ChatSession;

const HELP: &str = "\
Commands:
  /contacts                      list contacts and unread counts
  /select <name|id>              open a conversation
  /close                         close the open conversation
  /to <username> <message>       message a user by name
  /login <username> <password>   log in
  /logout                        log out
  /reconnect                     reopen the realtime connection
  /help                          show this help
  /quit                          exit
Any other line is sent to the open conversation.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Contacts,
    Select(String),
    Close,
    To { username: String, content: String },
    Login { username: String, password: String },
    Logout,
    Reconnect,
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command /{0}, try /help")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "contacts" => Command::Contacts,
        "close" => Command::Close,
        "logout" => Command::Logout,
        "reconnect" => Command::Reconnect,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "select" if !args.is_empty() => Command::Select(args.to_string()),
        "select" => return Err(CommandError::Usage("/select <name|id>")),
        "to" => match args.split_once(char::is_whitespace) {
            Some((username, content)) => Command::To {
                username: username.to_string(),
                content: content.trim_start().to_string(),
            },
            None => return Err(CommandError::Usage("/to <username> <message>")),
        },
        "login" => match args.split_once(char::is_whitespace) {
            Some((username, password)) => Command::Login {
                username: username.to_string(),
                password: password.trim().to_string(),
            },
            None => return Err(CommandError::Usage("/login <username> <password>")),
        },
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// `[HH:MM] author: content`
pub fn format_message(author: &str, message: &Message) -> String {
    format!(
        "[{}] {}: {}",
        message.created_at.format("%H:%M"),
        author,
        message.content
    )
}

/// Read commands from stdin and print session events until `/quit` or EOF.
pub async fn run(session: &ChatSession) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut events = session.subscribe();
    println!("{HELP}");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => {
                        if let Err(e) = execute(session, command).await {
                            println!("! {e}");
                            if e.needs_login() {
                                println!("! Log in again with /login <username> <password>");
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("! {e}"),
                }
            }

            event = events.recv() => match event {
                Ok(event) => render_event(session, event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "View fell behind session events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

async fn execute(session: &ChatSession, command: Command) -> Result<(), SessionError> {
    match command {
        Command::Send(content) => {
            session.send_message(&content).await?;
        }
        Command::Contacts => {
            let unread = session.unread_counts().await;
            let contacts = session.contacts().await;
            if contacts.is_empty() {
                println!("No contacts yet. Start one with /to <username> <message>");
            }
            for peer in contacts {
                match unread.get(&peer.id) {
                    Some(n) => println!("  {} ({}) [{} unread]", peer.display_name, peer.id.short(), n),
                    None => println!("  {} ({})", peer.display_name, peer.id.short()),
                }
            }
        }
        Command::Select(query) => {
            let peer = session
                .resolve_peer(&query)
                .await
                .ok_or(SessionError::UnknownPeer(query))?;
            let snapshot = session.select_peer(peer).await?;
            let name = session.display_name(peer).await;
            println!("--- {name} ---");
            for message in &snapshot.messages {
                println!("{}", format_message(&author_label(session, peer, message).await, message));
            }
        }
        Command::Close => session.deselect().await,
        Command::To { username, content } => {
            session.send_to_username(&username, &content).await?;
            println!("Sent to {username}");
        }
        Command::Login { username, password } => {
            session.login(&username, &password).await?;
            println!("Logged in as {username}");
        }
        Command::Logout => {
            session.logout().await;
            println!("Logged out");
        }
        Command::Reconnect => {
            session.connect_realtime().await?;
            println!("Realtime connection open");
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

async fn author_label(session: &ChatSession, peer: PeerId, message: &Message) -> String {
    if message.author_id == peer {
        session.display_name(peer).await
    } else {
        "you".to_string()
    }
}

async fn render_event(session: &ChatSession, event: SessionEvent) {
    match event {
        SessionEvent::MessageAppended { peer, message } => {
            println!("{}", format_message(&author_label(session, peer, &message).await, &message));
        }
        SessionEvent::UnreadChanged { peer, unread } if unread > 0 => {
            println!("* {}: {} unread", session.display_name(peer).await, unread);
        }
        SessionEvent::FetchFailed { peer, error } => {
            println!("! History of {} failed to load: {}", session.display_name(peer).await, error);
        }
        SessionEvent::RealtimeClosed => {
            println!("! Realtime connection lost, use /reconnect");
        }
        SessionEvent::UnreadChanged { .. } | SessionEvent::RosterUpdated { .. } => {}
    }
}
