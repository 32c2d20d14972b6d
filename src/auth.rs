use axum::{extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;

use crate::{AppError, Error};

pub const USER_ID: &str = "user_id";

/// Set by the upstream auth collaborator once it has verified the caller.
pub const IDENTITY_HEADER: &str = "x-authenticated-user";

/// The verified identity of a REST caller.
///
/// Taken from [`IDENTITY_HEADER`] when present and pinned into the session, so
/// later requests (the socket handshake included) carry it by cookie alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| anyhow::anyhow!(msg))?;

        let forwarded = parts
            .headers
            .get(IDENTITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);

        if let Some(user_id) = forwarded {
            if session.get::<String>(USER_ID).await?.as_deref() != Some(user_id.as_str()) {
                session.insert(USER_ID, &user_id).await?;
            }
            return Ok(AuthUser(user_id));
        }

        match session.get::<String>(USER_ID).await? {
            Some(user_id) => Ok(AuthUser(user_id)),
            None => Err(Error::Unauthorized.into()),
        }
    }
}

/// The session identity, if any, without rejecting anonymous callers.
pub async fn session_user(session: &Session) -> Option<String> {
    match session.get::<String>(USER_ID).await {
        Ok(user_id) => user_id,
        Err(err) => {
            tracing::debug!(error = %err, "session unreadable");
            None
        }
    }
}
