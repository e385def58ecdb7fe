//! Presence registry.
//!
//! Authoritative record of which identities have live connections on this
//! gateway. An identity is online iff it owns at least one connection.

use crate::protocol::ServerEvent;
use parking_lot::RwLock;
use parley_core::{Identity, UserId};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Identifier of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Sending half of a live connection.
///
/// Delivery never blocks: events go into the connection's bounded
/// outbound queue and are dropped if the client is not keeping up.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Identity,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, identity: Identity, tx: mpsc::Sender<ServerEvent>) -> Self {
        Self { id, identity, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.identity.id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Queue an event; returns false if it could not be queued.
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(conn = %self.id, user = %self.identity.id, "Outbound queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(conn = %self.id, "Connection closed, dropping event");
                false
            }
        }
    }
}

/// Online/offline transition of an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub identity: Identity,
    pub online: bool,
}

impl PresenceChange {
    pub fn into_event(self) -> ServerEvent {
        ServerEvent::PresenceChanged {
            user: self.identity,
            online: self.online,
        }
    }
}

struct PresenceEntry {
    identity: Identity,
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

/// Identity → live connections.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<UserId, PresenceEntry>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection.
    ///
    /// The new connection receives the roster. If this was the identity's
    /// first connection every other identity is told it came online, and
    /// the transition is returned. Both happen under the write lock so
    /// observers see transitions in registry order.
    pub fn register(&self, handle: ConnectionHandle) -> Option<PresenceChange> {
        let mut entries = self.entries.write();
        let user = handle.user_id();
        let entry = entries.entry(user).or_insert_with(|| PresenceEntry {
            identity: handle.identity.clone(),
            connections: HashMap::new(),
        });
        let was_offline = entry.connections.is_empty();
        entry.connections.insert(handle.id, handle.clone());

        handle.send(ServerEvent::PresenceRoster {
            users: roster(&entries),
        });

        if !was_offline {
            return None;
        }
        let change = PresenceChange {
            identity: handle.identity.clone(),
            online: true,
        };
        announce(&entries, user, &change);
        Some(change)
    }

    /// Remove a connection. If this was the identity's last connection the
    /// remaining identities are told it went offline, under the write lock,
    /// and the transition is returned. Unknown connections are ignored.
    pub fn unregister(&self, user: UserId, conn: ConnectionId) -> Option<PresenceChange> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&user)?;
        entry.connections.remove(&conn)?;
        if !entry.connections.is_empty() {
            return None;
        }
        let entry = entries.remove(&user)?;
        let change = PresenceChange {
            identity: entry.identity,
            online: false,
        };
        announce(&entries, user, &change);
        Some(change)
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.entries.read().contains_key(&user)
    }

    /// Whether `conn` is a live connection of `user`.
    pub fn contains(&self, user: UserId, conn: ConnectionId) -> bool {
        self.entries
            .read()
            .get(&user)
            .is_some_and(|e| e.connections.contains_key(&conn))
    }

    /// Online identities, ordered by id.
    pub fn snapshot(&self) -> Vec<Identity> {
        roster(&self.entries.read())
    }

    pub fn connections_of(&self, user: UserId) -> Vec<ConnectionHandle> {
        self.entries
            .read()
            .get(&user)
            .map(|e| e.connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Deliver to every connection of `user`. Returns how many accepted it.
    pub fn deliver_to(&self, user: UserId, event: &ServerEvent) -> usize {
        deliver(self.connections_of(user), event)
    }

    pub fn online_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn connection_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .map(|e| e.connections.len())
            .sum()
    }
}

fn roster(entries: &HashMap<UserId, PresenceEntry>) -> Vec<Identity> {
    let mut users: Vec<Identity> = entries.values().map(|e| e.identity.clone()).collect();
    users.sort_by_key(|u| u.id);
    users
}

/// Queue `change` on every connection not owned by the changed identity.
/// Called with the write lock held; `send` never blocks.
fn announce(entries: &HashMap<UserId, PresenceEntry>, user: UserId, change: &PresenceChange) {
    let event = change.clone().into_event();
    entries
        .iter()
        .filter(|(id, _)| **id != user)
        .flat_map(|(_, e)| e.connections.values())
        .for_each(|handle| {
            handle.send(event.clone());
        });
}

/// Queue `event` on each target. Returns how many accepted it.
pub(crate) fn deliver(targets: Vec<ConnectionHandle>, event: &ServerEvent) -> usize {
    targets
        .into_iter()
        .filter(|handle| handle.send(event.clone()))
        .count()
}
