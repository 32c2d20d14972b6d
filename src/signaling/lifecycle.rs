//! Room teardown.
//!
//! A room ends when its host ends it, or when both its live presence and its
//! durable membership are empty. The empty check runs after every departure,
//! whether it came from a socket leave, a disconnect or the REST leave endpoint.

use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{rooms::Room, Error, Result};

use super::{
    events::{EndReason, ServerEvent},
    presence::{ConnectionId, Entry},
    relay::{Relay, Scope},
};

impl Relay {
    /// Removes the connection from its room, if any, and announces it.
    ///
    /// Unregistering is the claim on the cleanup: when a concurrent host end (or an
    /// earlier leave) already detached the connection, nothing more happens.
    pub(super) async fn depart(&self, conn: ConnectionId) -> Result<()> {
        let room_id = self.room_of(conn);
        let Some(room_id) = room_id else {
            return Ok(());
        };

        let _guard = self.inner.locks.acquire(room_id).await;
        let entry = self.presence().unregister(conn);
        let Some(Entry { room_id, identity }) = entry else {
            return Ok(());
        };

        // another tab of the same participant is still here
        let still_live = self.presence().is_live(room_id, &identity);
        if still_live {
            return Ok(());
        }

        self.broadcast(
            ServerEvent::UserLeft { identity: identity.clone(), room_id },
            Scope::Room(room_id),
        );
        self.broadcast(ServerEvent::UpdateMembers(self.live_members_of(room_id)), Scope::Room(room_id));
        info!(%conn, %room_id, %identity, "left room");

        match self.inner.registry.remove_member(room_id, &identity).await {
            Ok(room) => self.settle(&room).await.map(drop),
            Err(Error::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Ends the room if nobody is live and nobody is a member any more.
    /// Callers hold the room lock.
    async fn settle(&self, room: &Room) -> Result<bool> {
        let live = self.presence().live_members_of(room.id);
        if !live.is_empty() || !room.members.is_empty() {
            return Ok(false);
        }
        self.retire(room.id, EndReason::Empty).await?;
        Ok(true)
    }

    /// Terminal transition. Callers hold the room lock.
    async fn retire(&self, room_id: Uuid, reason: EndReason) -> Result<()> {
        self.inner.registry.retire(room_id).await?;
        self.broadcast(ServerEvent::RoomEnded { room_id, reason }, Scope::Room(room_id));

        let detached = self.presence().detach_room(room_id);
        self.inner.locks.forget(room_id);

        info!(%room_id, ?reason, detached = detached.len(), "room ended");
        Ok(())
    }

    /// Host-only end. Everyone still live gets `room-ended` and is detached.
    pub async fn end_room(&self, room_id: Uuid, requester: &str) -> Result<()> {
        let (_guard, room) = self.lock_room(room_id).await?;
        if room.host != requester {
            warn!(%room_id, %requester, "end-room refused, not the host");
            return Err(Error::Forbidden);
        }
        self.retire(room_id, EndReason::Host).await
    }

    /// `end-room` from a socket. The requester is the identity the connection joined with.
    pub(super) async fn end_room_from(&self, conn: ConnectionId, room_ref: &str, host_id: &str) -> Result<()> {
        let entry = self.presence().entry(conn).cloned();
        let room = self
            .inner
            .registry
            .find_room(room_ref)
            .await?
            .ok_or_else(|| Error::room_not_found(room_ref))?;

        match entry {
            Some(Entry { room_id, identity }) if room_id == room.id => {
                if identity != host_id.trim() {
                    return Err(Error::Forbidden);
                }
                self.end_room(room.id, &identity).await
            }
            _ => Err(Error::NotJoined(format!("room {room_ref}"))),
        }
    }

    /// Durable join on behalf of the REST layer. Live presence is untouched.
    pub async fn admit(&self, room_ref: &str, identity: &str) -> Result<Room> {
        let room = self
            .inner
            .registry
            .find_room(room_ref)
            .await?
            .ok_or_else(|| Error::room_not_found(room_ref))?;

        let _guard = self.inner.locks.acquire(room.id).await;
        self.inner.registry.add_member(room.id, identity).await
    }

    /// Durable leave on behalf of the REST layer, followed by the empty-room check.
    pub async fn release(&self, room_id: Uuid, identity: &str) -> Result<Room> {
        let (_guard, _) = self.lock_room(room_id).await?;
        let mut room = self.inner.registry.remove_member(room_id, identity).await?;
        if self.settle(&room).await? {
            room.is_active = false;
        }
        Ok(room)
    }

    /// Locks a room that is known to exist, so unknown ids never reach the lock table.
    async fn lock_room(&self, room_id: Uuid) -> Result<(OwnedMutexGuard<()>, Room)> {
        if self.inner.registry.find_by_id(room_id).await?.is_none() {
            return Err(Error::room_not_found(room_id));
        }

        let guard = self.inner.locks.acquire(room_id).await;
        // may have ended while we waited
        match self.inner.registry.find_by_id(room_id).await? {
            Some(room) => Ok((guard, room)),
            None => {
                drop(guard);
                self.inner.locks.forget(room_id);
                Err(Error::room_not_found(room_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::signaling::relay::tests::{harness, members};

    use super::*;

    #[tokio::test]
    async fn disconnect_matches_explicit_leave() {
        let h = harness().await;
        let room = h.room("standup", "alice").await;
        let alice = h.joined("standup", "alice").await;
        let mut bob = h.joined("standup", "bob").await;
        let mut carol = h.joined("standup", "carol").await;
        bob.drain();

        h.relay.disconnect(alice.conn).await;
        let on_disconnect = bob.drain();
        carol.drain();

        h.relay.leave(carol.conn, "standup").await.unwrap();
        let on_leave = bob.drain();

        assert_eq!(
            on_disconnect,
            vec![
                ServerEvent::UserLeft { identity: "alice".into(), room_id: room.id },
                members(&["bob", "carol"]),
            ]
        );
        assert_eq!(
            on_leave,
            vec![
                ServerEvent::UserLeft { identity: "carol".into(), room_id: room.id },
                members(&["bob"]),
            ]
        );
    }

    #[tokio::test]
    async fn second_disconnect_is_harmless() {
        let h = harness().await;
        h.room("standup", "alice").await;
        let alice = h.joined("standup", "alice").await;
        let mut bob = h.joined("standup", "bob").await;

        h.relay.disconnect(alice.conn).await;
        bob.drain();
        h.relay.disconnect(alice.conn).await;
        assert!(bob.drain().is_empty());
    }

    #[tokio::test]
    async fn disconnect_racing_a_leave_cleans_up_once() {
        let h = harness().await;
        let room = h.room("standup", "alice").await;
        let mut alice = h.joined("standup", "alice").await;
        let bob = h.joined("standup", "bob").await;
        alice.drain();

        let room_ref = room.id.to_string();
        let (left, ()) = tokio::join!(h.relay.leave(bob.conn, &room_ref), h.relay.disconnect(bob.conn));
        assert!(matches!(left, Ok(()) | Err(Error::NotJoined(_))), "{left:?}");

        let user_left = alice
            .drain()
            .into_iter()
            .filter(|event| matches!(event, ServerEvent::UserLeft { .. }))
            .count();
        assert_eq!(user_left, 1);
        assert_eq!(h.relay.room_of(bob.conn), None);
        assert_eq!(h.relay.live_members_of(room.id), vec!["alice"]);
        let room = h.registry.find_by_id(room.id).await.unwrap().unwrap();
        assert_eq!(room.members, vec!["alice"]);
    }

    #[tokio::test]
    async fn standup_walkthrough() {
        let h = harness().await;
        let room = h.room("standup", "A").await;
        let mut a = h.joined("standup", "A").await;

        let mut b = h.client();
        h.relay.join(b.conn, "standup", "B".into()).await.unwrap();
        assert_eq!(b.drain(), vec![ServerEvent::ChatHistory(vec![]), members(&["A", "B"])]);
        assert_eq!(
            a.drain(),
            vec![ServerEvent::UserJoined { identity: "B".into(), room_id: room.id }, members(&["A", "B"])]
        );

        h.relay.relay_chat(b.conn, "standup", "hi".into()).await.unwrap();
        for events in [a.drain(), b.drain()] {
            let [ServerEvent::ChatMessage(message)] = events.as_slice() else {
                panic!("expected one chat message, got {events:?}");
            };
            assert_eq!((message.author.as_str(), message.text.as_str()), ("B", "hi"));
        }

        h.relay.disconnect(a.conn).await;
        assert_eq!(
            b.drain(),
            vec![ServerEvent::UserLeft { identity: "A".into(), room_id: room.id }, members(&["B"])]
        );
        assert!(h.registry.find_room("standup").await.unwrap().is_some());

        h.relay.leave(b.conn, "standup").await.unwrap();
        assert_eq!(h.registry.find_room("standup").await.unwrap(), None);

        let late = h.client();
        let err = h.relay.join(late.conn, "standup", "C".into()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn offline_member_keeps_room_alive() {
        let h = harness().await;
        let room = h.room("standup", "alice").await;
        h.registry.add_member(room.id, "dave").await.unwrap();
        let alice = h.joined("standup", "alice").await;

        h.relay.leave(alice.conn, "standup").await.unwrap();

        let room = h.registry.find_by_id(room.id).await.unwrap().unwrap();
        assert_eq!(room.members, vec!["dave"]);
    }

    #[tokio::test]
    async fn only_the_host_can_end() {
        let h = harness().await;
        let room = h.room("standup", "alice").await;
        let mut alice = h.joined("standup", "alice").await;
        let mut bob = h.joined("standup", "bob").await;
        alice.drain();

        h.relay
            .dispatch(bob.conn, &format!(r#"{{"event":"end-room","data":{{"roomId":"{}","hostId":"bob"}}}}"#, room.id))
            .await;

        assert!(alice.drain().is_empty());
        assert!(matches!(bob.drain().as_slice(), [ServerEvent::Error { code: "forbidden", .. }]));
        let unchanged = h.registry.find_by_id(room.id).await.unwrap().unwrap();
        assert_eq!(unchanged.members, vec!["alice", "bob"]);
        assert_eq!(h.relay.live_members_of(room.id), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn host_end_notifies_and_detaches_everyone() {
        let h = harness().await;
        let room = h.room("standup", "alice").await;
        let mut alice = h.joined("standup", "alice").await;
        let mut bob = h.joined("standup", "bob").await;
        alice.drain();

        h.relay
            .handle(alice.conn, crate::signaling::ClientEvent::EndRoom { room_id: "standup".into(), host_id: "alice".into() })
            .await
            .unwrap();

        let ended = ServerEvent::RoomEnded { room_id: room.id, reason: EndReason::Host };
        assert_eq!(alice.drain(), vec![ended.clone()]);
        assert_eq!(bob.drain(), vec![ended]);
        assert_eq!(h.relay.room_of(alice.conn), None);
        assert_eq!(h.relay.room_of(bob.conn), None);
        assert_eq!(h.registry.find_by_id(room.id).await.unwrap(), None);

        // detached connections leave quietly
        h.relay.disconnect(bob.conn).await;
        assert!(alice.drain().is_empty());
    }

    #[tokio::test]
    async fn end_by_non_host_over_rest_is_forbidden() {
        let h = harness().await;
        let room = h.room("standup", "alice").await;

        assert!(matches!(h.relay.end_room(room.id, "bob").await, Err(Error::Forbidden)));
        assert!(h.registry.find_by_id(room.id).await.unwrap().is_some());
        assert!(matches!(h.relay.end_room(Uuid::now_v7(), "bob").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn unknown_rooms_leave_no_lock_behind() {
        let h = harness().await;
        let room = h.room("standup", "alice").await;
        h.relay.end_room(room.id, "alice").await.unwrap();

        for _ in 0..3 {
            let id = Uuid::now_v7();
            assert!(matches!(h.relay.end_room(id, "mallory").await, Err(Error::NotFound(_))));
            assert!(matches!(h.relay.release(id, "mallory").await, Err(Error::NotFound(_))));
        }
        assert!(matches!(h.relay.release(room.id, "alice").await, Err(Error::NotFound(_))));
        assert_eq!(h.relay.inner.locks.len(), 0);
    }

    #[tokio::test]
    async fn rest_leave_of_last_member_ends_unattended_room() {
        let h = harness().await;
        let room = h.room("standup", "alice").await;
        h.relay.admit(&room.id.to_string(), "bob").await.unwrap();

        let after_bob = h.relay.release(room.id, "bob").await.unwrap();
        assert!(after_bob.is_active);

        let after_alice = h.relay.release(room.id, "alice").await.unwrap();
        assert!(!after_alice.is_active);
        assert_eq!(h.registry.find_by_id(room.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn rest_leave_keeps_room_with_live_presence() {
        let h = harness().await;
        let room = h.room("standup", "alice").await;
        let _alice = h.joined("standup", "alice").await;

        let room = h.relay.release(room.id, "alice").await.unwrap();
        assert!(room.is_active);
        assert!(room.members.is_empty());
        assert_eq!(h.relay.live_members_of(room.id), vec!["alice"]);
    }

    #[tokio::test]
    async fn same_identity_in_two_tabs_leaves_once() {
        let h = harness().await;
        let room = h.room("standup", "alice").await;
        let mut bob = h.joined("standup", "bob").await;
        let tab1 = h.joined("standup", "alice").await;
        let tab2 = h.joined("standup", "alice").await;
        bob.drain();

        h.relay.disconnect(tab1.conn).await;
        assert!(bob.drain().is_empty());

        h.relay.disconnect(tab2.conn).await;
        assert_eq!(
            bob.drain(),
            vec![ServerEvent::UserLeft { identity: "alice".into(), room_id: room.id }, members(&["bob"])]
        );
    }
}
