use axum::{debug_handler, extract::{Path, State}, Json};
use serde_json::{json, Value};

use crate::{auth::AuthUser, extract::RoomId, signaling::Relay, AppResult, AppState};

use super::{Room, RoomRegistry};

#[debug_handler(state = AppState)]
pub(crate) async fn list_rooms(
    State(registry): State<RoomRegistry>,
    _user: AuthUser,
) -> AppResult<Json<Vec<Room>>> {
    Ok(Json(registry.list_rooms().await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn join_room(
    State(relay): State<Relay>,
    AuthUser(user_id): AuthUser,
    Path(room): Path<String>,
) -> AppResult<Json<Room>> {
    Ok(Json(relay.admit(&room, &user_id).await?))
}

#[debug_handler(state = AppState)]
pub(crate) async fn leave_room(
    State(relay): State<Relay>,
    AuthUser(user_id): AuthUser,
    RoomId(room_id): RoomId,
) -> AppResult<Json<Value>> {
    let room = relay.release(room_id, &user_id).await?;
    Ok(Json(json!({ "message": "Left room successfully", "room": room })))
}

#[debug_handler(state = AppState)]
pub(crate) async fn end_room(
    State(relay): State<Relay>,
    AuthUser(user_id): AuthUser,
    RoomId(room_id): RoomId,
) -> AppResult<Json<Value>> {
    relay.end_room(room_id, &user_id).await?;
    Ok(Json(json!({ "message": "Room ended", "roomId": room_id })))
}
