use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    rooms::{ChatLog, RoomRegistry},
    Config, Error, Result,
};

use super::{
    events::{ClientEvent, ServerEvent, SignalKind},
    outbound::{lock, Outbound, RoomLocks},
    presence::{ConnectionId, Entry, Presence, Registration},
};

/// Audience of a broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Everyone,
    Connection(ConnectionId),
    Room(Uuid),
    RoomExcept(Uuid, ConnectionId),
    /// The live connections of one identity in a room, minus the sender.
    Peer { room_id: Uuid, identity: String, except: ConnectionId },
}

/// Routes socket events between the live participants of each room.
///
/// Cheap to clone; REST handlers get it injected through the app state and use
/// [`Relay::broadcast`] to reach connected clients.
#[derive(Clone)]
pub struct Relay {
    pub(super) inner: Arc<Inner>,
}

pub(super) struct Inner {
    pub(super) registry: RoomRegistry,
    pub(super) chat: ChatLog,
    pub(super) presence: Mutex<Presence>,
    pub(super) outbound: Outbound,
    pub(super) locks: RoomLocks,
    /// Session identity of each socket opened with one.
    sessions: Mutex<HashMap<ConnectionId, String>>,
    history_limit: u32,
}

impl Relay {
    pub fn new(registry: RoomRegistry, chat: ChatLog, config: &Config) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                chat,
                presence: Mutex::default(),
                outbound: Outbound::new(config.outbound_buffer),
                locks: RoomLocks::default(),
                sessions: Mutex::default(),
                history_limit: config.history_limit,
            }),
        }
    }

    pub(super) fn presence(&self) -> MutexGuard<'_, Presence> {
        lock(&self.inner.presence)
    }

    /// Opens an outbound queue for a fresh socket.
    pub fn connect(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        self.inner.outbound.attach()
    }

    /// Like [`Relay::connect`], remembering the session identity the handshake carried.
    pub fn connect_session(&self, user: Option<String>) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (conn, rx) = self.connect();
        if let Some(user) = user {
            lock(&self.inner.sessions).insert(conn, user);
        }
        (conn, rx)
    }

    pub fn session_of(&self, conn: ConnectionId) -> Option<String> {
        lock(&self.inner.sessions).get(&conn).cloned()
    }

    /// Cleans up after a socket is gone. Behaves exactly like an explicit leave.
    pub async fn disconnect(&self, conn: ConnectionId) {
        if let Err(err) = self.depart(conn).await {
            warn!(%conn, error = %err, "cleanup after disconnect incomplete");
        }
        self.inner.outbound.detach(conn);
        lock(&self.inner.sessions).remove(&conn);
        debug!(%conn, "connection closed");
    }

    pub fn live_members_of(&self, room_id: Uuid) -> Vec<String> {
        self.presence().live_members_of(room_id).into_iter().collect()
    }

    pub fn room_of(&self, conn: ConnectionId) -> Option<Uuid> {
        self.presence().room_of(conn)
    }

    pub fn broadcast(&self, event: ServerEvent, scope: Scope) {
        let targets = match scope {
            Scope::Everyone => self.inner.outbound.connections(),
            Scope::Connection(conn) => vec![conn],
            Scope::Room(room_id) => self.presence().connections_in(room_id),
            Scope::RoomExcept(room_id, except) => {
                let mut conns = self.presence().connections_in(room_id);
                conns.retain(|conn| *conn != except);
                conns
            }
            Scope::Peer { room_id, identity, except } => {
                let mut conns = self.presence().connections_of(room_id, &identity);
                conns.retain(|conn| *conn != except);
                conns
            }
        };
        self.inner.outbound.deliver(&targets, &event);
    }

    /// Sends a failure back to the one connection that caused it.
    pub fn report(&self, conn: ConnectionId, err: &Error) {
        self.broadcast(ServerEvent::error(err), Scope::Connection(conn));
    }

    /// Handles one raw frame. Failures go back to the sender only.
    pub async fn dispatch(&self, conn: ConnectionId, frame: &str) {
        let result = match ClientEvent::parse(frame) {
            Ok(event) => self.handle(conn, event).await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            warn!(%conn, error = %err, "rejected client event");
            self.report(conn, &err);
        }
    }

    pub async fn handle(&self, conn: ConnectionId, event: ClientEvent) -> Result<()> {
        match event {
            ClientEvent::JoinRoom { room_id, display_name } => {
                self.join(conn, &room_id, display_name.trim().to_owned()).await
            }
            ClientEvent::ChatMessage { room_id, text, .. } => {
                self.relay_chat(conn, &room_id, text).await
            }
            ClientEvent::LeaveRoom { room_id, .. } => self.leave(conn, &room_id).await,
            ClientEvent::EndRoom { room_id, host_id } => {
                self.end_room_from(conn, &room_id, &host_id).await
            }
            ClientEvent::RtcOffer { room_id, sdp, target } => {
                self.relay_signal(conn, &room_id, SignalKind::Offer, sdp, target).await
            }
            ClientEvent::RtcAnswer { room_id, sdp, target } => {
                self.relay_signal(conn, &room_id, SignalKind::Answer, sdp, target).await
            }
            ClientEvent::RtcIceCandidate { room_id, candidate, target } => {
                self.relay_signal(conn, &room_id, SignalKind::IceCandidate, candidate, target).await
            }
        }
    }

    /// Registers `conn` in a room, then catches it up and announces it.
    ///
    /// A connection still joined elsewhere leaves that room first.
    pub async fn join(&self, conn: ConnectionId, room_ref: &str, identity: String) -> Result<()> {
        if let Some(user) = self.session_of(conn) {
            if user != identity {
                warn!(%conn, session = %user, display_name = %identity, "displayName differs from the session identity");
            }
        }

        let room = self
            .inner
            .registry
            .find_room(room_ref)
            .await?
            .ok_or_else(|| Error::room_not_found(room_ref))?;

        let current = self.room_of(conn);
        if current.is_some_and(|current| current != room.id) {
            if let Err(err) = self.depart(conn).await {
                warn!(%conn, error = %err, "leaving previous room incomplete");
                self.report(conn, &err);
            }
        }

        let _guard = self.inner.locks.acquire(room.id).await;
        // may have ended while we waited
        let room = self
            .inner
            .registry
            .find_by_id(room.id)
            .await?
            .ok_or_else(|| Error::room_not_found(room_ref))?;

        let was_live = self.presence().is_live(room.id, &identity);
        let registration = self.presence().register(conn, room.id, identity.clone())?;
        if registration == Registration::AlreadyJoined {
            debug!(%conn, room_id = %room.id, "repeated join ignored");
            self.catch_up(conn, room.id).await;
            self.broadcast(ServerEvent::UpdateMembers(self.live_members_of(room.id)), Scope::Connection(conn));
            return Ok(());
        }

        if !was_live {
            self.broadcast(
                ServerEvent::UserJoined { identity: identity.clone(), room_id: room.id },
                Scope::RoomExcept(room.id, conn),
            );
        }

        if let Err(err) = self.inner.registry.add_member(room.id, &identity).await {
            warn!(%conn, room_id = %room.id, error = %err, "membership not persisted");
            self.report(conn, &err);
        }

        self.catch_up(conn, room.id).await;
        self.broadcast(ServerEvent::UpdateMembers(self.live_members_of(room.id)), Scope::Room(room.id));

        info!(%conn, room_id = %room.id, %identity, "joined room {}", room.name);
        Ok(())
    }

    async fn catch_up(&self, conn: ConnectionId, room_id: Uuid) {
        match self.inner.chat.recent(room_id, self.inner.history_limit).await {
            Ok(messages) => self.broadcast(ServerEvent::ChatHistory(messages), Scope::Connection(conn)),
            Err(err) => {
                warn!(%conn, %room_id, error = %err, "chat history unavailable");
                self.broadcast(
                    ServerEvent::Error {
                        message: "Failed to fetch chat history.".to_owned(),
                        code: err.code(),
                    },
                    Scope::Connection(conn),
                );
            }
        }
    }

    /// Persists then broadcasts to the whole room, sender included, so every client
    /// renders the stored order and timestamp.
    pub async fn relay_chat(&self, conn: ConnectionId, room_ref: &str, text: String) -> Result<()> {
        let Entry { room_id, .. } = self.membership(conn, room_ref).await?;
        let _guard = self.inner.locks.acquire(room_id).await;
        let Entry { room_id, identity } = self.membership(conn, room_ref).await?;

        let message = self.inner.chat.append(room_id, &identity, &text).await?;
        self.broadcast(ServerEvent::ChatMessage(message), Scope::Room(room_id));
        Ok(())
    }

    /// Forwards an opaque signaling payload to the other participants, never back to the sender.
    pub async fn relay_signal(
        &self,
        conn: ConnectionId,
        room_ref: &str,
        kind: SignalKind,
        payload: Value,
        target: Option<String>,
    ) -> Result<()> {
        let Entry { room_id, .. } = self.membership(conn, room_ref).await?;
        let _guard = self.inner.locks.acquire(room_id).await;
        let Entry { room_id, identity } = self.membership(conn, room_ref).await?;

        let scope = match target {
            Some(target) => {
                if !self.presence().is_live(room_id, &target) {
                    return Err(Error::NotFound(format!("participant {target}")));
                }
                Scope::Peer { room_id, identity: target, except: conn }
            }
            None => Scope::RoomExcept(room_id, conn),
        };
        self.broadcast(ServerEvent::signal(kind, room_id, identity, payload), scope);
        Ok(())
    }

    pub async fn leave(&self, conn: ConnectionId, room_ref: &str) -> Result<()> {
        self.membership(conn, room_ref).await?;
        self.depart(conn).await
    }

    /// The connection's entry, if it has joined the room `room_ref` names (by id or name).
    async fn membership(&self, conn: ConnectionId, room_ref: &str) -> Result<Entry> {
        let entry = self.presence().entry(conn).cloned();
        let Some(entry) = entry else {
            return Err(Error::NotJoined(format!("room {room_ref}")));
        };
        if entry.room_id.to_string() == room_ref.trim() {
            return Ok(entry);
        }

        match self.inner.registry.find_room(room_ref).await? {
            Some(room) if room.id == entry.room_id => Ok(entry),
            _ => Err(Error::NotJoined(format!("room {room_ref}"))),
        }
    }
}
