//! Participant identity.
//!
//! A [`Peer`] names one endpoint of the system: a client rank, a server
//! rank, or a logical group member. Peers are the unit the Domain
//! Registry, the Aggregation action, and the Listener key their state
//! on, so equality and ordering are both defined structurally rather
//! than by any transport-assigned handle.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a participant: a group name plus a numeric id within
/// that group.
///
/// Two peers are equal iff both fields match; ordering is
/// lexicographic on `group` then `id`, which gives deterministic
/// iteration order for the peer sets used by Aggregation and the
/// Domain Registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub group: String,
    pub id: u64,
}

impl Peer {
    pub fn new(group: impl Into<String>, id: u64) -> Self {
        Self {
            group: group.into(),
            id,
        }
    }
}

impl PartialOrd for Peer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Peer {
    fn cmp(&self, other: &Self) -> Ordering {
        self.group.cmp(&other.group).then(self.id.cmp(&other.id))
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_on_group_and_id() {
        assert_eq!(Peer::new("clients", 1), Peer::new("clients", 1));
        assert_ne!(Peer::new("clients", 1), Peer::new("clients", 2));
        assert_ne!(Peer::new("clients", 1), Peer::new("servers", 1));
    }

    #[test]
    fn orders_by_group_then_id() {
        let mut peers = vec![
            Peer::new("servers", 0),
            Peer::new("clients", 2),
            Peer::new("clients", 1),
        ];
        peers.sort();
        assert_eq!(
            peers,
            vec![
                Peer::new("clients", 1),
                Peer::new("clients", 2),
                Peer::new("servers", 0),
            ]
        );
    }

    #[test]
    fn displays_as_group_colon_id() {
        assert_eq!(Peer::new("clients", 3).to_string(), "clients:3");
    }
}
