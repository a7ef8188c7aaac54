use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::application::errors::ClientError;
use crate::domain::entities::{Room, RoomEvent, RoomMember, SyncEvent};

/// Chat client trait - abstraction over the chat server SDK
///
/// Implementations own the session, the transport and the room cache. The
/// runtime only ever talks to the server through this trait.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Fully qualified user id of the bot
    fn user_id(&self) -> String;

    /// Log in with a password, reusing a stored session when available
    async fn login(&self, password: &str, device_name: &str) -> Result<(), ClientError>;

    /// Whether encryption keys still need uploading after login
    fn should_upload_keys(&self) -> bool {
        false
    }

    async fn keys_upload(&self) -> Result<(), ClientError>;

    /// Run one sync request and return the events it produced, in order
    async fn sync_once(&self, timeout: Duration) -> Result<Vec<SyncEvent>, ClientError>;

    /// Send an event, returning the server-assigned event id
    async fn room_send(&self, room_id: &str, event_type: &str, content: Value) -> Result<String, ClientError>;

    async fn room_redact(&self, room_id: &str, event_id: &str, reason: Option<&str>) -> Result<String, ClientError>;

    async fn room_get_event(&self, room_id: &str, event_id: &str) -> Result<RoomEvent, ClientError>;

    /// Upload media, returning its content uri
    async fn upload(&self, data: Vec<u8>, content_type: &str, filename: &str) -> Result<String, ClientError>;

    async fn joined_members(&self, room_id: &str) -> Result<Vec<RoomMember>, ClientError>;

    async fn room_typing(&self, room_id: &str, typing: bool, timeout: Duration) -> Result<(), ClientError>;

    async fn join(&self, room_id: &str) -> Result<(), ClientError>;

    async fn leave(&self, room_id: &str) -> Result<(), ClientError>;

    async fn forget(&self, room_id: &str) -> Result<(), ClientError>;

    /// Snapshot of the live room cache
    fn rooms(&self) -> BTreeMap<String, Room>;

    fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms().remove(room_id)
    }

    async fn close(&self) {}
}
