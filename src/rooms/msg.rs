use serde::Serialize;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{db, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_id: Uuid,
    pub author: String,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Append-only chat store. Reads always come back oldest-first.
#[derive(Clone)]
pub struct ChatLog {
    db_pool: SqlitePool,
}

impl ChatLog {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    /// Persists a message and returns it with its server-assigned timestamp.
    pub async fn append(&self, room_id: Uuid, author: &str, text: &str) -> Result<ChatMessage> {
        let timestamp = db::now_millis();
        sqlx::query("INSERT INTO messages (room_id,author,text,timestamp) VALUES (?,?,?,?)")
            .bind(room_id.to_string())
            .bind(author)
            .bind(text)
            .bind(timestamp)
            .execute(&self.db_pool)
            .await?;

        Ok(ChatMessage {
            room_id,
            author: author.to_owned(),
            text: text.to_owned(),
            timestamp: db::from_millis(timestamp),
        })
    }

    /// The last `limit` messages of a room, oldest first.
    pub async fn recent(&self, room_id: Uuid, limit: u32) -> Result<Vec<ChatMessage>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT author,text,timestamp FROM (
                SELECT seq,author,text,timestamp FROM messages WHERE room_id=? ORDER BY seq DESC LIMIT ?
            ) ORDER BY seq ASC",
        )
            .bind(room_id.to_string())
            .bind(limit)
            .fetch_all(&self.db_pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(author, text, timestamp)| ChatMessage {
                room_id,
                author,
                text,
                timestamp: db::from_millis(timestamp),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recent_is_capped_and_oldest_first() {
        let chat = ChatLog::new(db::memory_pool().await);
        let room = Uuid::now_v7();
        let other = Uuid::now_v7();

        for i in 0..60 {
            chat.append(room, "alice", &format!("m{i}")).await.unwrap();
        }
        chat.append(other, "bob", "elsewhere").await.unwrap();

        let recent = chat.recent(room, 50).await.unwrap();
        let texts: Vec<_> = recent.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts.len(), 50);
        assert_eq!(texts.first(), Some(&"m10"));
        assert_eq!(texts.last(), Some(&"m59"));
        assert!(recent.iter().all(|m| m.room_id == room));
    }

    #[tokio::test]
    async fn empty_room_has_no_history() {
        let chat = ChatLog::new(db::memory_pool().await);
        assert!(chat.recent(Uuid::now_v7(), 50).await.unwrap().is_empty());
    }

    #[test]
    fn serializes_with_rfc3339_timestamp() {
        let message = ChatMessage {
            room_id: Uuid::nil(),
            author: "bob".into(),
            text: "hi".into(),
            timestamp: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["author"], "bob");
        assert_eq!(json["roomId"], Uuid::nil().to_string());
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00Z");
    }
}
