//! Room router.
//!
//! Rooms are runtime broadcast scopes. Membership is never persisted: it
//! only exists while a connection stays joined, and a connection can only
//! join while it is registered in the presence registry.

use crate::presence::{deliver, ConnectionHandle, ConnectionId, PresenceRegistry};
use crate::protocol::ServerEvent;
use parking_lot::Mutex;
use parley_core::{RoomKey, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
struct RoomTable {
    members: HashMap<RoomKey, HashMap<ConnectionId, ConnectionHandle>>,
    joined: HashMap<ConnectionId, HashSet<RoomKey>>,
}

impl RoomTable {
    fn remove(&mut self, room: &RoomKey, conn: ConnectionId) -> bool {
        let Some(members) = self.members.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&conn).is_some();
        if members.is_empty() {
            self.members.remove(room);
        }
        removed
    }
}

/// Room membership and fan-out.
pub struct RoomRouter {
    presence: Arc<PresenceRegistry>,
    table: Mutex<RoomTable>,
}

impl RoomRouter {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self {
            presence,
            table: Mutex::new(RoomTable::default()),
        }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.presence
    }

    /// Join `room`. Returns false if already joined or if the connection is
    /// not live.
    pub fn join(&self, room: RoomKey, handle: &ConnectionHandle) -> bool {
        if !self.presence.contains(handle.user_id(), handle.id()) {
            debug!(conn = %handle.id(), room = %room, "Ignoring join from unregistered connection");
            return false;
        }
        let mut table = self.table.lock();
        let newly = table
            .members
            .entry(room)
            .or_default()
            .insert(handle.id(), handle.clone())
            .is_none();
        table.joined.entry(handle.id()).or_default().insert(room);
        newly
    }

    /// Leave `room`. Returns false if the connection was not a member.
    pub fn leave(&self, room: &RoomKey, conn: ConnectionId) -> bool {
        let mut table = self.table.lock();
        let emptied = match table.joined.get_mut(&conn) {
            Some(rooms) => {
                rooms.remove(room);
                rooms.is_empty()
            }
            None => false,
        };
        if emptied {
            table.joined.remove(&conn);
        }
        table.remove(room, conn)
    }

    /// Remove a connection from every room it joined.
    pub fn leave_all(&self, conn: ConnectionId) -> Vec<RoomKey> {
        let mut table = self.table.lock();
        let rooms: Vec<RoomKey> = table
            .joined
            .remove(&conn)
            .map(|r| r.into_iter().collect())
            .unwrap_or_default();
        for room in &rooms {
            table.remove(room, conn);
        }
        rooms
    }

    pub fn is_member(&self, room: &RoomKey, conn: ConnectionId) -> bool {
        self.table
            .lock()
            .members
            .get(room)
            .is_some_and(|m| m.contains_key(&conn))
    }

    pub fn member_count(&self, room: &RoomKey) -> usize {
        self.table.lock().members.get(room).map_or(0, HashMap::len)
    }

    fn members_where(
        &self,
        room: &RoomKey,
        keep: impl Fn(&ConnectionHandle) -> bool,
    ) -> Vec<ConnectionHandle> {
        self.table
            .lock()
            .members
            .get(room)
            .map(|m| m.values().filter(|h| keep(h)).cloned().collect())
            .unwrap_or_default()
    }

    /// Deliver to every connection joined to `room`. An empty room is a
    /// silent no-op. Returns how many connections accepted the event.
    pub fn broadcast(&self, room: &RoomKey, event: &ServerEvent) -> usize {
        deliver(self.members_where(room, |_| true), event)
    }

    /// Deliver to the room's connections that do not belong to `user`.
    pub fn broadcast_except_user(&self, room: &RoomKey, user: UserId, event: &ServerEvent) -> usize {
        deliver(self.members_where(room, |h| h.user_id() != user), event)
    }

    /// Deliver to all live connections of `user`, joined or not.
    pub fn deliver_to_identity(&self, user: UserId, event: &ServerEvent) -> usize {
        self.presence.deliver_to(user, event)
    }

    /// Deliver to the connections of `user` that are not joined to `room`,
    /// so no connection receives the same event twice.
    pub fn deliver_to_identity_outside(
        &self,
        user: UserId,
        room: &RoomKey,
        event: &ServerEvent,
    ) -> usize {
        let targets: Vec<ConnectionHandle> = {
            let table = self.table.lock();
            let members = table.members.get(room);
            self.presence
                .connections_of(user)
                .into_iter()
                .filter(|h| members.map_or(true, |m| !m.contains_key(&h.id())))
                .collect()
        };
        deliver(targets, event)
    }
}
