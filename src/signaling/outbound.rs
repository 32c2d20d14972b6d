use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    OwnedMutexGuard,
};
use uuid::Uuid;

use super::{events::ServerEvent, presence::ConnectionId};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded per-connection queues drained by each socket's writer task.
///
/// Delivery never waits: a peer whose queue is full loses that event, the rest of
/// the room is unaffected.
pub(crate) struct Outbound {
    capacity: usize,
    peers: Mutex<HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>,
}

impl Outbound {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            peers: Mutex::default(),
        }
    }

    pub(crate) fn attach(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let conn = Uuid::now_v7();
        let (tx, rx) = mpsc::channel(self.capacity);
        lock(&self.peers).insert(conn, tx);
        (conn, rx)
    }

    pub(crate) fn detach(&self, conn: ConnectionId) -> bool {
        lock(&self.peers).remove(&conn).is_some()
    }

    pub(crate) fn connections(&self) -> Vec<ConnectionId> {
        lock(&self.peers).keys().copied().collect()
    }

    pub(crate) fn deliver(&self, targets: &[ConnectionId], event: &ServerEvent) {
        let peers = lock(&self.peers);
        for conn in targets {
            let Some(tx) = peers.get(conn) else {
                continue;
            };
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(%conn, "outbound queue full, dropping event");
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(%conn, "outbound queue closed");
                }
            }
        }
    }
}

/// One async mutex per room, held across the store round-trips of a room mutation.
#[derive(Default)]
pub(crate) struct RoomLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl RoomLocks {
    pub(crate) async fn acquire(&self, room_id: Uuid) -> OwnedMutexGuard<()> {
        let room_lock = lock(&self.locks).entry(room_id).or_default().clone();
        room_lock.lock_owned().await
    }

    pub(crate) fn forget(&self, room_id: Uuid) {
        lock(&self.locks).remove(&room_id);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.locks).len()
    }
}
