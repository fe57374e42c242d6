use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// Peer identity = backend user id
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Server-assigned message id. Also the tiebreak of the timeline order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The other participant of a direct conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub id: PeerId,
    /// The backend calls this field `username`.
    #[serde(alias = "username")]
    pub display_name: String,
}

impl Peer {
    pub fn new(id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// A direct message as delivered by the backend, over REST or the realtime
/// channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub author_id: PeerId,
    /// Omitted by some backend revisions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<PeerId>,
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Ordering key of a timeline: `created_at`, then `id`.
    pub fn order_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id)
    }

    pub fn cmp_order(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

/// Accept RFC 3339 timestamps as well as the naive ISO-8601 form Python
/// backends emit for UTC datetimes (no offset).
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(e) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_accepts_backend_shape() {
        let json = r#"{
            "id": "00000000-0000-0000-0000-000000000001",
            "author_id": "00000000-0000-0000-0000-000000000007",
            "conversation_id": "00000000-0000-0000-0000-0000000000aa",
            "content": "hi",
            "created_at": "2024-11-02T10:15:30.250000"
        }"#;

        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.author_id, PeerId(Uuid::from_u128(7)));
        assert_eq!(msg.receiver_id, None);
        assert_eq!(msg.created_at.to_rfc3339(), "2024-11-02T10:15:30.250+00:00");
    }

    #[test]
    fn test_peer_accepts_username_alias() {
        let json = r#"{"id": "00000000-0000-0000-0000-000000000007", "username": "bob", "email": "b@x.io"}"#;
        let peer: Peer = serde_json::from_str(json).unwrap();
        assert_eq!(peer.display_name, "bob");
    }

    #[test]
    fn test_order_key_breaks_ties_by_id() {
        let at = parse_timestamp("2024-11-02T10:15:30Z").unwrap();
        let make = |id: u128| Message {
            id: MessageId(Uuid::from_u128(id)),
            author_id: PeerId(Uuid::from_u128(7)),
            receiver_id: None,
            content: String::new(),
            created_at: at,
        };

        assert_eq!(make(1).cmp_order(&make(2)), Ordering::Less);
        assert_eq!(make(2).cmp_order(&make(2)), Ordering::Equal);
    }

    #[test]
    fn test_peer_id_parse() {
        let id: PeerId = " 00000000-0000-0000-0000-000000000009 ".parse().unwrap();
        assert_eq!(id, PeerId(Uuid::from_u128(9)));
        assert!("not-a-uuid".parse::<PeerId>().is_err());
    }
}
