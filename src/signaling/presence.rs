//! Who is live right now.
//!
//! One entry per joined connection, never persisted. Each connection walks
//! `Unjoined -> Joined(room) -> Unjoined`; moving straight to another room is refused
//! here and handled by the relay as a leave followed by a join.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;
use uuid::Uuid;

pub type ConnectionId = Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresenceError {
    #[error("connection already joined room {0}, leave it first")]
    InOtherRoom(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub room_id: Uuid,
    pub identity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Joined,
    AlreadyJoined,
}

#[derive(Debug, Default)]
pub struct Presence {
    entries: HashMap<ConnectionId, Entry>,
    rooms: HashMap<Uuid, HashMap<ConnectionId, String>>,
}

impl Presence {
    pub fn register(
        &mut self,
        conn: ConnectionId,
        room_id: Uuid,
        identity: String,
    ) -> Result<Registration, PresenceError> {
        if let Some(entry) = self.entries.get(&conn) {
            if entry.room_id == room_id {
                return Ok(Registration::AlreadyJoined);
            }
            return Err(PresenceError::InOtherRoom(entry.room_id));
        }

        self.rooms
            .entry(room_id)
            .or_default()
            .insert(conn, identity.clone());
        self.entries.insert(conn, Entry { room_id, identity });
        Ok(Registration::Joined)
    }

    /// Removes and returns the connection's association. Only the first caller gets `Some`.
    pub fn unregister(&mut self, conn: ConnectionId) -> Option<Entry> {
        let entry = self.entries.remove(&conn)?;
        if let Some(room) = self.rooms.get_mut(&entry.room_id) {
            room.remove(&conn);
            if room.is_empty() {
                self.rooms.remove(&entry.room_id);
            }
        }
        Some(entry)
    }

    pub fn entry(&self, conn: ConnectionId) -> Option<&Entry> {
        self.entries.get(&conn)
    }

    pub fn room_of(&self, conn: ConnectionId) -> Option<Uuid> {
        self.entries.get(&conn).map(|entry| entry.room_id)
    }

    pub fn live_members_of(&self, room_id: Uuid) -> BTreeSet<String> {
        self.rooms
            .get(&room_id)
            .map(|room| room.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_live(&self, room_id: Uuid, identity: &str) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|room| room.values().any(|live| live == identity))
    }

    pub fn connections_in(&self, room_id: Uuid) -> Vec<ConnectionId> {
        self.rooms
            .get(&room_id)
            .map(|room| room.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn connections_of(&self, room_id: Uuid, identity: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(&room_id)
            .map(|room| {
                room.iter()
                    .filter(|(_, live)| live.as_str() == identity)
                    .map(|(conn, _)| *conn)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drops every entry of a room at once, returning what was detached.
    pub fn detach_room(&mut self, room_id: Uuid) -> Vec<(ConnectionId, String)> {
        let Some(room) = self.rooms.remove(&room_id) else {
            return Vec::new();
        };
        for conn in room.keys() {
            self.entries.remove(conn);
        }
        room.into_iter().collect()
    }
}
