//! Contact roster: the peers the user has a conversation with.
//!
//! The roster is replaced wholesale on every refresh. Refreshes may overlap
//! (one at startup, more whenever an unknown peer writes), so each one is
//! issued a generation number and a response older than the last applied
//! one is dropped.

use std::collections::HashSet;

use tracing::debug;

use forum_chat_shared::{Peer, PeerId};

/// Generation of a roster refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RosterTicket(u64);

#[derive(Debug, Clone, Default)]
pub struct ContactRoster {
    peers: Vec<Peer>,
    ids: HashSet<PeerId>,
    issued: u64,
    applied: u64,
}

impl ContactRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_refresh(&mut self) -> RosterTicket {
        self.issued += 1;
        RosterTicket(self.issued)
    }

    /// Replace the roster with a fetched list. Returns `false` if a newer
    /// refresh was already applied.
    pub fn apply_refresh(&mut self, ticket: RosterTicket, peers: Vec<Peer>) -> bool {
        if ticket.0 <= self.applied {
            debug!(ticket = ticket.0, applied = self.applied, "Dropping outdated roster");
            return false;
        }

        let mut ids = HashSet::with_capacity(peers.len());
        let peers: Vec<Peer> = peers
            .into_iter()
            .filter(|peer| ids.insert(peer.id))
            .collect();

        debug!(count = peers.len(), "Roster replaced");
        self.peers = peers;
        self.ids = ids;
        self.applied = ticket.0;
        true
    }

    /// Empty the roster. Refreshes issued before the reset are dropped when
    /// they complete.
    pub fn reset(&mut self) {
        self.peers.clear();
        self.ids.clear();
        self.applied = self.issued;
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.ids.contains(peer)
    }

    pub fn get(&self, peer: &PeerId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id == *peer)
    }

    /// Display name of `peer`, falling back to the short id.
    pub fn display_name(&self, peer: &PeerId) -> String {
        self.get(peer)
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| peer.short())
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Peer> {
        self.peers
            .iter()
            .find(|p| p.display_name.eq_ignore_ascii_case(name))
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn peer(id: u128, name: &str) -> Peer {
        Peer::new(PeerId(Uuid::from_u128(id)), name)
    }

    #[test]
    fn test_refresh_replaces_wholesale() {
        let mut roster = ContactRoster::new();
        let t1 = roster.begin_refresh();
        assert!(roster.apply_refresh(t1, vec![peer(7, "bob"), peer(9, "carol")]));
        assert_eq!(roster.len(), 2);

        let t2 = roster.begin_refresh();
        assert!(roster.apply_refresh(t2, vec![peer(9, "carol")]));
        assert!(!roster.contains(&PeerId(Uuid::from_u128(7))));
        assert_eq!(roster.display_name(&PeerId(Uuid::from_u128(9))), "carol");
    }

    #[test]
    fn test_outdated_refresh_is_dropped() {
        let mut roster = ContactRoster::new();
        let older = roster.begin_refresh();
        let newer = roster.begin_refresh();

        assert!(roster.apply_refresh(newer, vec![peer(7, "bob"), peer(9, "carol")]));
        assert!(!roster.apply_refresh(older, vec![peer(7, "bob")]));
        assert_eq!(roster.len(), 2);
    }

    #[test]
    fn test_refresh_issued_before_reset_is_dropped() {
        let mut roster = ContactRoster::new();
        let t1 = roster.begin_refresh();
        assert!(roster.apply_refresh(t1, vec![peer(7, "bob")]));

        let in_flight = roster.begin_refresh();
        roster.reset();
        assert!(roster.is_empty());

        assert!(!roster.apply_refresh(in_flight, vec![peer(7, "bob"), peer(9, "carol")]));
        assert!(roster.is_empty());

        let fresh = roster.begin_refresh();
        assert!(roster.apply_refresh(fresh, vec![peer(11, "dave")]));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_duplicate_entries_collapse() {
        let mut roster = ContactRoster::new();
        let t = roster.begin_refresh();
        roster.apply_refresh(t, vec![peer(7, "bob"), peer(7, "bobby")]);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.find_by_name("BOB").map(|p| p.id.0.as_u128()), Some(7));
    }

    #[test]
    fn test_unknown_peer_name_falls_back_to_short_id() {
        let roster = ContactRoster::new();
        let id = PeerId(Uuid::from_u128(0xabcdef12_0000_0000_0000_000000000000));
        assert_eq!(roster.display_name(&id), "abcdef12");
    }
}
