use axum::{debug_handler, extract::{ws::{Message, WebSocket}, State, WebSocketUpgrade}, response::IntoResponse};
use futures_util::{SinkExt, StreamExt};
use tower_sessions::Session;

use crate::{auth, signaling::Relay, AppState, Error};

/// One signaling socket per client session. Rooms are chosen by `join-room` frames.
#[debug_handler(state = AppState)]
pub async fn signaling_ws(
    State(relay): State<Relay>,
    session: Session,

    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user = auth::session_user(&session).await;
    ws.on_upgrade(async move |stream| serve(relay, stream, user).await)
}

async fn serve(relay: Relay, stream: WebSocket, user: Option<String>) {
    let (conn, mut rx) = relay.connect_session(user.clone());
    let (mut sender, mut receiver) = stream.split();
    tracing::info!(%conn, user = ?user, "connection opened");

    let mut broadcast_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::error!(%conn, error = %err, "unserializable event");
                    continue;
                }
            };
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // one frame at a time, so a connection's own events never race each other
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => relay.dispatch(conn, text.as_str()).await,
            Message::Binary(_) => relay.report(conn, &Error::invalid("binary frames are not supported")),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    relay.disconnect(conn).await;

    tokio::select! {
        _ = &mut broadcast_task => {},
        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => broadcast_task.abort(),
    };
}
