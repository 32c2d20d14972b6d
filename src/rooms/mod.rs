mod msg;
mod new;
mod registry;
mod room;
pub mod ws;

use axum::{routing::{get, post}, Router};

use crate::AppState;

pub use msg::{ChatLog, ChatMessage};
pub use registry::{Room, RoomRegistry};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(room::list_rooms).post(new::new_room))
        .route("/{room}/join", post(room::join_room))
        .route("/{room_id}/leave", post(room::leave_room))
        .route("/{room_id}/end", post(room::end_room))
}
