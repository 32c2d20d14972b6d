use thiserror::Error;

use crate::signaling::presence::PresenceError;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures of room and signaling operations.
///
/// Every variant is reported to the caller only: a targeted `error` event on the
/// socket, or an error status on the REST side. None of them is broadcast.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("only the host can end this room")]
    Forbidden,

    #[error("room name already in use: {0}")]
    Conflict(String),

    #[error("connection has not joined {0}")]
    NotJoined(String),

    #[error(transparent)]
    Presence(#[from] PresenceError),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("missing authenticated identity")]
    Unauthorized,

    #[error("store unavailable: {0}")]
    Store(#[from] sqlx::Error),
}

impl Error {
    pub fn room_not_found(room: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("room {room}"))
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::Invalid(msg.into())
    }

    /// Stable machine-readable tag carried by `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Forbidden => "forbidden",
            Error::Conflict(_) => "conflict",
            Error::NotJoined(_) => "not_joined",
            Error::Presence(_) => "already_joined",
            Error::Invalid(_) => "invalid",
            Error::Unauthorized => "unauthorized",
            Error::Store(_) => "store_unavailable",
        }
    }

    /// Text safe to hand to a client. Store internals stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Error::Store(_) => "storage is temporarily unavailable, please retry".to_owned(),
            other => other.to_string(),
        }
    }

    pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }
}
