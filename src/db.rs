use std::{str::FromStr, time::Duration};

use sqlx::{sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions}, SqlitePool};
use time::OffsetDateTime;

// rooms
//   unique: id
//   unique: name WHERE is_active
// room_members
//   unique: room_id, identity
// messages
//   seq orders a room's history oldest-first
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS rooms (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        host TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at INTEGER NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS rooms_active_name ON rooms (name) WHERE is_active = 1",
    "CREATE TABLE IF NOT EXISTS room_members (
        room_id TEXT NOT NULL,
        identity TEXT NOT NULL,
        PRIMARY KEY (room_id, identity)
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id TEXT NOT NULL,
        author TEXT NOT NULL,
        text TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS messages_room ON messages (room_id, seq)",
];

pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?;

    // every connection to :memory: is its own database
    if database_url.contains(":memory:") {
        return SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await;
    }

    // readers never block the single writer; writers queue on the busy timeout
    let options = options
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

pub async fn migrate(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(db_pool).await?;
    }
    Ok(())
}

pub(crate) fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn from_millis(millis: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

pub(crate) fn decode_err(err: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let db_pool = connect("sqlite::memory:", 1).await.unwrap();
    migrate(&db_pool).await.unwrap();
    db_pool
}

/// A migrated pool over a fresh database file, shared by many connections.
#[cfg(test)]
pub(crate) async fn file_pool(dir: &tempfile::TempDir) -> SqlitePool {
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("peercall.db").display());
    let db_pool = connect(&url, 16).await.unwrap();
    migrate(&db_pool).await.unwrap();
    db_pool
}
