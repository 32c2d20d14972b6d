//! Socket frames. Every frame is `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{rooms::ChatMessage, Error, Result};

pub const MAX_NAME_LEN: usize = 64;
pub const MAX_TEXT_LEN: usize = 2000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom {
        room_id: String,
        display_name: String,
    },
    ChatMessage {
        room_id: String,
        author: String,
        text: String,
    },
    LeaveRoom {
        room_id: String,
        user_id: Option<String>,
        display_name: Option<String>,
    },
    EndRoom {
        room_id: String,
        host_id: String,
    },
    RtcOffer {
        room_id: String,
        sdp: Value,
        target: Option<String>,
    },
    RtcAnswer {
        room_id: String,
        sdp: Value,
        target: Option<String>,
    },
    RtcIceCandidate {
        room_id: String,
        candidate: Value,
        target: Option<String>,
    },
}

impl ClientEvent {
    /// Decodes and validates one inbound frame.
    pub fn parse(frame: &str) -> Result<Self> {
        let event: ClientEvent =
            serde_json::from_str(frame).map_err(|e| Error::invalid(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<()> {
        use ClientEvent::*;
        match self {
            JoinRoom { room_id, display_name } => {
                required("roomId", room_id)?;
                required("displayName", display_name)?;
                if display_name.trim().chars().count() > MAX_NAME_LEN {
                    return Err(Error::invalid(format!("displayName longer than {MAX_NAME_LEN} characters")));
                }
            }
            ChatMessage { room_id, author, text } => {
                required("roomId", room_id)?;
                required("author", author)?;
                required("text", text)?;
                if text.chars().count() > MAX_TEXT_LEN {
                    return Err(Error::invalid(format!("text longer than {MAX_TEXT_LEN} characters")));
                }
            }
            LeaveRoom { room_id, .. } => required("roomId", room_id)?,
            EndRoom { room_id, host_id } => {
                required("roomId", room_id)?;
                required("hostId", host_id)?;
            }
            RtcOffer { room_id, sdp: payload, target }
            | RtcAnswer { room_id, sdp: payload, target }
            | RtcIceCandidate { room_id, candidate: payload, target } => {
                required("roomId", room_id)?;
                if payload.is_null() {
                    return Err(Error::invalid("signaling payload is missing"));
                }
                if let Some(target) = target {
                    required("target", target)?;
                }
            }
        }
        Ok(())
    }
}

fn required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Empty,
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    ChatHistory(Vec<ChatMessage>),
    ChatMessage(ChatMessage),
    UserJoined { identity: String, room_id: Uuid },
    UserLeft { identity: String, room_id: Uuid },
    UpdateMembers(Vec<String>),
    RoomCreated { room_id: Uuid, name: String },
    RoomEnded { room_id: Uuid, reason: EndReason },
    RtcOffer { room_id: Uuid, from: String, sdp: Value },
    RtcAnswer { room_id: Uuid, from: String, sdp: Value },
    RtcIceCandidate { room_id: Uuid, from: String, candidate: Value },
    Error { message: String, code: &'static str },
}

impl ServerEvent {
    pub fn error(err: &Error) -> Self {
        ServerEvent::Error {
            message: err.client_message(),
            code: err.code(),
        }
    }

    pub fn signal(kind: SignalKind, room_id: Uuid, from: String, payload: Value) -> Self {
        match kind {
            SignalKind::Offer => ServerEvent::RtcOffer { room_id, from, sdp: payload },
            SignalKind::Answer => ServerEvent::RtcAnswer { room_id, from, sdp: payload },
            SignalKind::IceCandidate => ServerEvent::RtcIceCandidate { room_id, from, candidate: payload },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_join_room() {
        let event = ClientEvent::parse(r#"{"event":"join-room","data":{"roomId":"standup","displayName":"alice"}}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinRoom { room_id: "standup".into(), display_name: "alice".into() }
        );
    }

    #[test]
    fn leave_room_identity_fields_are_optional() {
        let event = ClientEvent::parse(r#"{"event":"leave-room","data":{"roomId":"r1"}}"#).unwrap();
        assert!(matches!(event, ClientEvent::LeaveRoom { user_id: None, display_name: None, .. }));
    }

    #[test]
    fn signaling_payload_is_opaque() {
        let frame = json!({
            "event": "rtc-ice-candidate",
            "data": { "roomId": "r1", "candidate": { "candidate": "candidate:1 1 udp", "sdpMid": "0" } }
        });
        let event = ClientEvent::parse(&frame.to_string()).unwrap();
        let ClientEvent::RtcIceCandidate { candidate, target, .. } = event else {
            panic!("wrong variant");
        };
        assert_eq!(candidate["sdpMid"], "0");
        assert_eq!(target, None);
    }

    #[test]
    fn rejects_malformed_frames() {
        for frame in [
            "not json",
            r#"{"event":"dance","data":{}}"#,
            r#"{"event":"join-room","data":{"roomId":"r1"}}"#,
            r#"{"event":"join-room","data":{"roomId":" ","displayName":"alice"}}"#,
            r#"{"event":"chat-message","data":{"roomId":"r1","author":"a","text":""}}"#,
            r#"{"event":"rtc-offer","data":{"roomId":"r1","sdp":null}}"#,
            r#"{"event":"end-room","data":{"roomId":"r1","hostId":""}}"#,
        ] {
            let err = ClientEvent::parse(frame).unwrap_err();
            assert_eq!(err.code(), "invalid", "{frame}");
        }
    }

    #[test]
    fn rejects_oversized_text() {
        let frame = json!({
            "event": "chat-message",
            "data": { "roomId": "r1", "author": "a", "text": "x".repeat(MAX_TEXT_LEN + 1) }
        });
        assert!(ClientEvent::parse(&frame.to_string()).is_err());
    }

    #[test]
    fn server_events_use_event_data_framing() {
        let room_id = Uuid::nil();
        let joined = serde_json::to_value(ServerEvent::UserJoined { identity: "bob".into(), room_id }).unwrap();
        assert_eq!(joined, json!({ "event": "user-joined", "data": { "identity": "bob", "roomId": room_id } }));

        let members = serde_json::to_value(ServerEvent::UpdateMembers(vec!["a".into(), "b".into()])).unwrap();
        assert_eq!(members, json!({ "event": "update-members", "data": ["a", "b"] }));

        let ended = serde_json::to_value(ServerEvent::RoomEnded { room_id, reason: EndReason::Host }).unwrap();
        assert_eq!(ended["data"]["reason"], "host");

        let error = serde_json::to_value(ServerEvent::error(&Error::Forbidden)).unwrap();
        assert_eq!(error["event"], "error");
        assert_eq!(error["data"]["code"], "forbidden");
    }
}
