//! Console adapter for development/testing
//!
//! An in-memory chat server: rooms, members and power levels live in a map,
//! every event the bot sends is recorded, and inbound events are queued
//! through a channel and handed out by `sync_once`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::application::errors::ClientError;
use crate::domain::entities::{Room, RoomEvent, RoomMember, SyncEvent};
use crate::domain::traits::ChatClient;

pub const CONSOLE_USER: &str = "@console:localhost";
pub const CONSOLE_ROOM: &str = "!console:localhost";

#[derive(Default)]
struct ConsoleState {
    rooms: BTreeMap<String, Room>,
    invites: BTreeMap<String, Room>,
    /// (room id, event) of everything the bot sent
    sent: Vec<(String, RoomEvent)>,
    received: Vec<(String, RoomEvent)>,
    uploads: Vec<(String, usize)>,
    joined: Vec<String>,
    left: Vec<String>,
    forgotten: Vec<String>,
    next_event: u64,
    fail_sends: bool,
    fail_uploads: bool,
    join_failures: u32,
    login_failures: u32,
    logged_in: bool,
    closed: bool,
}

/// Console chat client for local development and tests
pub struct ConsoleAdapter {
    user_id: String,
    /// Print outgoing messages as `[BOT] ...`
    echo: bool,
    state: Mutex<ConsoleState>,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<SyncEvent>>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SyncEvent>>,
}

impl ConsoleAdapter {
    pub fn new(user_id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            user_id: user_id.into(),
            echo: false,
            state: Mutex::new(ConsoleState::default()),
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Adapter for `--console`: one room shared by the bot and the console user
    pub fn interactive(bot_user_id: impl Into<String>) -> Self {
        let mut adapter = Self::new(bot_user_id);
        adapter.echo = true;
        let room = Room::new(CONSOLE_ROOM)
            .with_name("console")
            .with_member(adapter.user_id.clone(), Some("bot"))
            .with_member(CONSOLE_USER, Some("console"))
            .with_power_level(CONSOLE_USER, 100)
            .direct();
        adapter.add_room(room);
        adapter
    }

    fn state(&self) -> MutexGuard<'_, ConsoleState> {
        // a panicking holder leaves plain data behind, keep using it
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_room(&self, room: Room) {
        self.state().rooms.insert(room.room_id.clone(), room);
    }

    /// Sender half of the inbound queue, e.g. for a stdin reader task
    pub fn inbound(&self) -> Option<mpsc::UnboundedSender<SyncEvent>> {
        self.inbound_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Drop the adapter's own sender. Once every other sender is gone too,
    /// `sync_once` drains what is queued and then reports `Closed`.
    pub fn close_inbound(&self) {
        self.inbound_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    pub fn push(&self, event: SyncEvent) -> bool {
        match self.inbound() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Queue a text message from `sender`, returning the event for inspection
    pub fn push_message(&self, room_id: &str, sender: &str, body: &str) -> Option<RoomEvent> {
        let event = RoomEvent::text(self.next_event_id(), sender, body);
        self.push_event(room_id, event.clone()).then_some(event)
    }

    /// Queue any room event; textual messages arrive as `Message`, the rest as `Unknown`
    pub fn push_event(&self, room_id: &str, event: RoomEvent) -> bool {
        match self.sync_event(room_id, event) {
            Some(sync_event) => self.push(sync_event),
            None => false,
        }
    }

    /// Record `event` as received in `room_id` and wrap it for the sync queue.
    ///
    /// `None` if the room is unknown.
    pub fn sync_event(&self, room_id: &str, event: RoomEvent) -> Option<SyncEvent> {
        let room = self.room(room_id)?;
        self.state().received.push((room_id.to_string(), event.clone()));
        Some(if event.is_text_message() {
            SyncEvent::Message { room, event }
        } else {
            SyncEvent::Unknown { room, event }
        })
    }

    /// Text message from `sender` wrapped for the sync queue
    pub fn text_event(&self, room_id: &str, sender: &str, body: &str) -> Option<SyncEvent> {
        let event = RoomEvent::text(self.next_event_id(), sender, body);
        self.sync_event(room_id, event)
    }

    /// Queue an invite from `sender` into `room`.
    ///
    /// Like a homeserver's stripped invite state, the queued event only
    /// names the room and the inviter. The full membership of `room` becomes
    /// visible once the bot has joined.
    pub fn push_invite(&self, room: Room, sender: &str, is_direct: bool) -> bool {
        let mut snapshot = Room::new(room.room_id.clone()).with_member(sender, None);
        snapshot.name = room.name.clone();
        snapshot.is_direct = is_direct;
        self.state().invites.insert(room.room_id.clone(), room);
        self.push(SyncEvent::Invite {
            room: snapshot,
            sender: sender.to_string(),
            is_direct,
        })
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.state().fail_sends = fail;
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        self.state().fail_uploads = fail;
    }

    /// Make the next `count` join attempts fail
    pub fn fail_next_joins(&self, count: u32) {
        self.state().join_failures = count;
    }

    pub fn fail_next_logins(&self, count: u32) {
        self.state().login_failures = count;
    }

    pub fn sent_events(&self) -> Vec<(String, RoomEvent)> {
        self.state().sent.clone()
    }

    /// Bodies of the `m.room.message` events sent to `room_id`
    pub fn sent_bodies(&self, room_id: &str) -> Vec<String> {
        self.state()
            .sent
            .iter()
            .filter(|(room, e)| room == room_id && e.event_type == "m.room.message")
            .filter_map(|(_, e)| e.body().map(str::to_string))
            .collect()
    }

    pub fn clear_sent(&self) {
        self.state().sent.clear();
    }

    pub fn uploads(&self) -> Vec<(String, usize)> {
        self.state().uploads.clone()
    }

    pub fn joined_rooms(&self) -> Vec<String> {
        self.state().joined.clone()
    }

    pub fn left_rooms(&self) -> Vec<String> {
        self.state().left.clone()
    }

    pub fn forgotten_rooms(&self) -> Vec<String> {
        self.state().forgotten.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state().logged_in
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn next_event_id(&self) -> String {
        let mut state = self.state();
        state.next_event += 1;
        format!("$console{}", state.next_event)
    }

    fn record_sent(&self, room_id: &str, event_type: &str, content: Value) -> String {
        let event_id = self.next_event_id();
        let event = RoomEvent::new(event_id.clone(), self.user_id.clone(), event_type, content);
        if self.echo {
            print_event(&event);
        }
        self.state().sent.push((room_id.to_string(), event));
        event_id
    }
}

fn print_event(event: &RoomEvent) {
    match event.event_type.as_str() {
        "m.room.message" => match event.msgtype() {
            Some("m.image") => println!("[BOT] <image {}>", event.body().unwrap_or_default()),
            _ => println!("[BOT] {}", event.body().unwrap_or_default()),
        },
        "m.reaction" => println!("[BOT] reacted {}", event.reaction_key().unwrap_or_default()),
        "m.room.redaction" => println!("[BOT] redacted a message"),
        other => println!("[BOT] <{}>", other),
    }
}

#[async_trait]
impl ChatClient for ConsoleAdapter {
    fn user_id(&self) -> String {
        self.user_id.clone()
    }

    async fn login(&self, _password: &str, device_name: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        if state.login_failures > 0 {
            state.login_failures -= 1;
            return Err(ClientError::Login("M_FORBIDDEN".to_string()));
        }
        state.logged_in = true;
        tracing::info!("Console client logged in as {} ({})", self.user_id, device_name);
        Ok(())
    }

    async fn keys_upload(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn sync_once(&self, timeout: Duration) -> Result<Vec<SyncEvent>, ClientError> {
        let mut rx = self.inbound_rx.lock().await;
        let first = match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => return Err(ClientError::Closed),
            Err(_) => return Ok(Vec::new()),
        };

        let mut events = vec![first];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        Ok(events)
    }

    async fn room_send(&self, room_id: &str, event_type: &str, content: Value) -> Result<String, ClientError> {
        if self.state().fail_sends {
            return Err(ClientError::Connection("console send disabled".to_string()));
        }
        Ok(self.record_sent(room_id, event_type, content))
    }

    async fn room_redact(&self, room_id: &str, event_id: &str, reason: Option<&str>) -> Result<String, ClientError> {
        if self.state().fail_sends {
            return Err(ClientError::Connection("console send disabled".to_string()));
        }
        let content = json!({ "redacts": event_id, "reason": reason });
        Ok(self.record_sent(room_id, "m.room.redaction", content))
    }

    async fn room_get_event(&self, room_id: &str, event_id: &str) -> Result<RoomEvent, ClientError> {
        let state = self.state();
        state
            .sent
            .iter()
            .chain(state.received.iter())
            .find(|(room, e)| room == room_id && e.event_id == event_id)
            .map(|(_, e)| e.clone())
            .ok_or_else(|| ClientError::NotFound(event_id.to_string()))
    }

    async fn upload(&self, data: Vec<u8>, _content_type: &str, filename: &str) -> Result<String, ClientError> {
        let mut state = self.state();
        if state.fail_uploads {
            return Err(ClientError::Connection("console upload disabled".to_string()));
        }
        state.uploads.push((filename.to_string(), data.len()));
        Ok(format!("mxc://localhost/{}", Uuid::new_v4().simple()))
    }

    async fn joined_members(&self, room_id: &str) -> Result<Vec<RoomMember>, ClientError> {
        self.room(room_id)
            .map(|room| room.members())
            .ok_or_else(|| ClientError::NotFound(room_id.to_string()))
    }

    async fn room_typing(&self, _room_id: &str, _typing: bool, _timeout: Duration) -> Result<(), ClientError> {
        Ok(())
    }

    async fn join(&self, room_id: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        if state.join_failures > 0 {
            state.join_failures -= 1;
            return Err(ClientError::Http {
                status: 429,
                errcode: "M_LIMIT_EXCEEDED".to_string(),
                message: "Too many requests".to_string(),
            });
        }

        let room = state
            .invites
            .remove(room_id)
            .or_else(|| state.rooms.get(room_id).cloned())
            .unwrap_or_else(|| Room::new(room_id))
            .with_member(self.user_id.clone(), None);
        state.rooms.insert(room_id.to_string(), room);
        state.joined.push(room_id.to_string());
        Ok(())
    }

    async fn leave(&self, room_id: &str) -> Result<(), ClientError> {
        let mut state = self.state();
        state.rooms.remove(room_id);
        state.left.push(room_id.to_string());
        Ok(())
    }

    async fn forget(&self, room_id: &str) -> Result<(), ClientError> {
        self.state().forgotten.push(room_id.to_string());
        Ok(())
    }

    fn rooms(&self) -> BTreeMap<String, Room> {
        self.state().rooms.clone()
    }

    async fn close(&self) {
        self.state().closed = true;
        tracing::info!("Console client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> ConsoleAdapter {
        let adapter = ConsoleAdapter::new("@bot:h");
        adapter.add_room(
            Room::new("!r:h")
                .with_member("@bot:h", None)
                .with_member("@alice:h", Some("Alice")),
        );
        adapter
    }

    #[tokio::test]
    async fn records_sent_events() {
        let adapter = adapter();
        let id = adapter
            .room_send("!r:h", "m.room.message", json!({"msgtype": "m.text", "body": "hi"}))
            .await
            .unwrap();

        let event = adapter.room_get_event("!r:h", &id).await.unwrap();
        assert_eq!(event.sender, "@bot:h");
        assert_eq!(adapter.sent_bodies("!r:h"), vec!["hi"]);
        assert!(adapter.room_get_event("!other:h", &id).await.is_err());
    }

    #[tokio::test]
    async fn failing_sends_and_uploads() {
        let adapter = adapter();
        adapter.set_fail_sends(true);
        adapter.set_fail_uploads(true);
        assert!(adapter.room_send("!r:h", "m.room.message", json!({})).await.is_err());
        assert!(adapter.upload(vec![1, 2], "image/png", "a.png").await.is_err());
        assert!(adapter.sent_events().is_empty());
    }

    #[tokio::test]
    async fn sync_drains_queue_then_closes() {
        let adapter = adapter();
        adapter.push_message("!r:h", "@alice:h", "one").unwrap();
        adapter
            .push_event("!r:h", RoomEvent::reaction("$x", "@alice:h", "$y", "👍"));
        adapter.close_inbound();

        let events = adapter.sync_once(Duration::from_millis(10)).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SyncEvent::Message { .. }));
        assert!(matches!(events[1], SyncEvent::Unknown { .. }));
        assert!(matches!(
            adapter.sync_once(Duration::from_millis(10)).await,
            Err(ClientError::Closed)
        ));
    }

    #[tokio::test]
    async fn sync_times_out_empty() {
        let adapter = adapter();
        let events = adapter.sync_once(Duration::from_millis(5)).await.unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn join_moves_invited_room_into_cache() {
        let adapter = adapter();
        let invited = Room::new("!new:h").with_member("@carol:h", None);
        adapter.push_invite(invited, "@carol:h", true);
        assert!(adapter.room("!new:h").is_none());

        adapter.fail_next_joins(1);
        assert!(adapter.join("!new:h").await.is_err());
        adapter.join("!new:h").await.unwrap();

        let room = adapter.room("!new:h").unwrap();
        assert_eq!(room.member_count(), 2);
        assert_eq!(adapter.joined_rooms(), vec!["!new:h"]);

        adapter.leave("!new:h").await.unwrap();
        assert!(adapter.room("!new:h").is_none());
    }

    #[tokio::test]
    async fn invite_event_only_names_the_inviter() {
        let adapter = adapter();
        let group = Room::new("!g:h")
            .with_member("@carol:h", None)
            .with_member("@dave:h", None)
            .with_member("@erin:h", None);
        adapter.push_invite(group, "@carol:h", false);

        let events = adapter.sync_once(Duration::from_millis(10)).await.unwrap();
        match &events[0] {
            SyncEvent::Invite { room, sender, .. } => {
                assert_eq!(sender, "@carol:h");
                assert_eq!(room.member_count(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        adapter.join("!g:h").await.unwrap();
        assert_eq!(adapter.joined_members("!g:h").await.unwrap().len(), 4);
    }
}
