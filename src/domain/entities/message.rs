use super::Room;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_MESSAGE: &str = "m.room.message";
pub const EVENT_REACTION: &str = "m.reaction";
pub const EVENT_MEMBER: &str = "m.room.member";
pub const EVENT_POWER_LEVELS: &str = "m.room.power_levels";
pub const EVENT_NAME: &str = "m.room.name";

/// A room event as delivered by the chat server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub event_id: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub origin_server_ts: i64,
    #[serde(default)]
    pub content: Value,
}

impl RoomEvent {
    pub fn new(
        event_id: impl Into<String>,
        sender: impl Into<String>,
        event_type: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            sender: sender.into(),
            event_type: event_type.into(),
            origin_server_ts: chrono::Utc::now().timestamp_millis(),
            content,
        }
    }

    /// Plain `m.text` message event
    pub fn text(event_id: impl Into<String>, sender: impl Into<String>, body: &str) -> Self {
        Self::new(
            event_id,
            sender,
            EVENT_MESSAGE,
            serde_json::json!({ "msgtype": "m.text", "body": body }),
        )
    }

    /// `m.reaction` annotating `relates_to`
    pub fn reaction(
        event_id: impl Into<String>,
        sender: impl Into<String>,
        relates_to: &str,
        key: &str,
    ) -> Self {
        Self::new(
            event_id,
            sender,
            EVENT_REACTION,
            serde_json::json!({
                "m.relates_to": {
                    "event_id": relates_to,
                    "rel_type": "m.annotation",
                    "key": key,
                }
            }),
        )
    }

    pub fn body(&self) -> Option<&str> {
        self.content.get("body").and_then(Value::as_str)
    }

    pub fn formatted_body(&self) -> Option<&str> {
        self.content.get("formatted_body").and_then(Value::as_str)
    }

    pub fn msgtype(&self) -> Option<&str> {
        self.content.get("msgtype").and_then(Value::as_str)
    }

    /// `content.m.relates_to.event_id`, if the event relates to another one
    pub fn relates_to_event_id(&self) -> Option<&str> {
        self.content
            .get("m.relates_to")
            .and_then(|r| r.get("event_id"))
            .and_then(Value::as_str)
    }

    /// Reaction key for `m.reaction` events
    pub fn reaction_key(&self) -> Option<&str> {
        self.content
            .get("m.relates_to")
            .and_then(|r| r.get("key"))
            .and_then(Value::as_str)
    }

    /// `m.text` only. Notices are what bots send, so they never reach commands or hooks.
    pub fn is_text_message(&self) -> bool {
        self.event_type == EVENT_MESSAGE && self.msgtype() == Some("m.text")
    }
}

/// One item of a sync response, routed by the dispatcher
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// An `m.text` message
    Message { room: Room, event: RoomEvent },
    /// Any other timeline event, reactions included
    Unknown { room: Room, event: RoomEvent },
    /// The bot got invited into `room`
    Invite {
        room: Room,
        sender: String,
        is_direct: bool,
    },
}

impl SyncEvent {
    pub fn room(&self) -> &Room {
        match self {
            SyncEvent::Message { room, .. }
            | SyncEvent::Unknown { room, .. }
            | SyncEvent::Invite { room, .. } => room,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_exposes_relation() {
        let event = RoomEvent::reaction("$r", "@a:h", "$orig", "👍");
        assert_eq!(event.relates_to_event_id(), Some("$orig"));
        assert_eq!(event.reaction_key(), Some("👍"));
        assert!(!event.is_text_message());
    }

    #[test]
    fn decodes_server_json() {
        let raw = serde_json::json!({
            "event_id": "$1",
            "sender": "@a:h",
            "type": "m.room.message",
            "origin_server_ts": 1_700_000_000_000i64,
            "content": { "msgtype": "m.notice", "body": "hi" }
        });
        let event: RoomEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.body(), Some("hi"));
        assert_eq!(event.relates_to_event_id(), None);
    }

    #[test]
    fn only_plain_text_counts_as_text_message() {
        assert!(RoomEvent::text("$1", "@a:h", "hi").is_text_message());
        for msgtype in ["m.notice", "m.emote", "m.image"] {
            let event = RoomEvent::new(
                "$2",
                "@a:h",
                EVENT_MESSAGE,
                serde_json::json!({ "msgtype": msgtype, "body": "!echo hi" }),
            );
            assert!(!event.is_text_message(), "{} counted as text", msgtype);
        }
    }
}
