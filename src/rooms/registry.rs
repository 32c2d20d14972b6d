use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{db, Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    /// Sorted, no duplicates.
    pub members: Vec<String>,
    pub host: String,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Room {
    pub fn is_member(&self, identity: &str) -> bool {
        self.members.binary_search_by(|m| m.as_str().cmp(identity)).is_ok()
    }
}

/// Durable record of rooms and their members.
///
/// Never pushes network events; callers notify the relay after mutating.
#[derive(Clone)]
pub struct RoomRegistry {
    db_pool: SqlitePool,
    retain_ended: bool,
}

type RoomRow = (String, String, String, bool, i64);

impl RoomRegistry {
    pub fn new(db_pool: SqlitePool, retain_ended: bool) -> Self {
        Self { db_pool, retain_ended }
    }

    /// Inserts a new active room with `creator` as host and first member.
    ///
    /// The partial unique index on active names makes the check-then-insert atomic:
    /// the losing side of a concurrent create gets [`Error::Conflict`].
    pub async fn create_room(&self, name: &str, creator: &str) -> Result<Room> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid("room name is required"));
        }
        if Uuid::parse_str(name).is_ok() {
            return Err(Error::invalid("room name must not look like a room id"));
        }

        let id = Uuid::now_v7();
        let created_at = db::now_millis();

        let mut tx = self.db_pool.begin().await?;
        let inserted = sqlx::query("INSERT INTO rooms (id,name,host,is_active,created_at) VALUES (?,?,?,1,?)")
            .bind(id.to_string())
            .bind(name)
            .bind(creator)
            .bind(created_at)
            .execute(&mut *tx)
            .await;
        match inserted {
            Err(err) if Error::is_unique_violation(&err) => {
                return Err(Error::Conflict(name.to_owned()));
            }
            other => other?,
        };
        sqlx::query("INSERT OR IGNORE INTO room_members (room_id,identity) VALUES (?,?)")
            .bind(id.to_string())
            .bind(creator)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Room {
            id,
            name: name.to_owned(),
            members: vec![creator.to_owned()],
            host: creator.to_owned(),
            is_active: true,
            created_at: db::from_millis(created_at),
        })
    }

    /// Resolves an active room by id, falling back to its name.
    pub async fn find_room(&self, name_or_id: &str) -> Result<Option<Room>> {
        if let Ok(id) = Uuid::parse_str(name_or_id) {
            if let Some(room) = self.find_by_id(id).await? {
                return Ok(Some(room));
            }
        }

        let row: Option<RoomRow> =
            sqlx::query_as("SELECT id,name,host,is_active,created_at FROM rooms WHERE name=? AND is_active=1")
                .bind(name_or_id.trim())
                .fetch_optional(&self.db_pool)
                .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Room>> {
        let row: Option<RoomRow> =
            sqlx::query_as("SELECT id,name,host,is_active,created_at FROM rooms WHERE id=? AND is_active=1")
                .bind(id.to_string())
                .fetch_optional(&self.db_pool)
                .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>> {
        let rows: Vec<RoomRow> =
            sqlx::query_as("SELECT id,name,host,is_active,created_at FROM rooms WHERE is_active=1 ORDER BY created_at")
                .fetch_all(&self.db_pool)
                .await?;

        let mut rooms = Vec::with_capacity(rows.len());
        for row in rows {
            rooms.push(self.hydrate(row).await?);
        }
        Ok(rooms)
    }

    /// Idempotent: adding an existing member changes nothing.
    ///
    /// One statement, so the active check and the write share a single write lock.
    pub async fn add_member(&self, id: Uuid, identity: &str) -> Result<Room> {
        sqlx::query(
            "INSERT OR IGNORE INTO room_members (room_id,identity)
            SELECT ?,? WHERE EXISTS (SELECT 1 FROM rooms WHERE id=? AND is_active=1)",
        )
            .bind(id.to_string())
            .bind(identity)
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;

        self.find_by_id(id).await?.ok_or_else(|| Error::room_not_found(id))
    }

    /// Idempotent: removing a non-member changes nothing.
    pub async fn remove_member(&self, id: Uuid, identity: &str) -> Result<Room> {
        sqlx::query(
            "DELETE FROM room_members WHERE room_id=? AND identity=?
            AND EXISTS (SELECT 1 FROM rooms WHERE id=? AND is_active=1)",
        )
            .bind(id.to_string())
            .bind(identity)
            .bind(id.to_string())
            .execute(&self.db_pool)
            .await?;

        self.find_by_id(id).await?.ok_or_else(|| Error::room_not_found(id))
    }

    pub async fn delete_room(&self, id: Uuid) -> Result<()> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query("DELETE FROM room_members WHERE room_id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM rooms WHERE id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Keeps the record for audit, but it no longer resolves and its name is free again.
    pub async fn deactivate(&self, id: Uuid) -> Result<()> {
        let mut tx = self.db_pool.begin().await?;
        sqlx::query("DELETE FROM room_members WHERE room_id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE rooms SET is_active=0 WHERE id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Terminal transition, delete or deactivate depending on the retention setting.
    pub async fn retire(&self, id: Uuid) -> Result<()> {
        if self.retain_ended {
            self.deactivate(id).await
        } else {
            self.delete_room(id).await
        }
    }

    async fn hydrate(&self, (id, name, host, is_active, created_at): RoomRow) -> Result<Room> {
        let members: Vec<(String,)> =
            sqlx::query_as("SELECT identity FROM room_members WHERE room_id=? ORDER BY identity")
                .bind(&id)
                .fetch_all(&self.db_pool)
                .await?;

        Ok(Room {
            id: Uuid::parse_str(&id).map_err(db::decode_err)?,
            name,
            members: members.into_iter().map(|(m,)| m).collect(),
            host,
            is_active,
            created_at: db::from_millis(created_at),
        })
    }
}
