use axum::{debug_handler, extract::State, http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Deserialize;

use crate::{auth::AuthUser, extract::AppJson, signaling::{Relay, Scope, ServerEvent}, AppResult, AppState};

use super::RoomRegistry;

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomBody {
    name: String,
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_room(
    State(registry): State<RoomRegistry>,
    State(relay): State<Relay>,
    AuthUser(user_id): AuthUser,

    AppJson(NewRoomBody { name }): AppJson<NewRoomBody>,
) -> AppResult<Response> {
    let room = registry.create_room(&name, &user_id).await?;
    tracing::info!(room_id = %room.id, host = %user_id, "created room {}", room.name);

    relay.broadcast(
        ServerEvent::RoomCreated { room_id: room.id, name: room.name.clone() },
        Scope::Everyone,
    );

    Ok((StatusCode::CREATED, Json(room)).into_response())
}
