//! Matrix adapter - client-server API v3 over reqwest

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::errors::ClientError;
use crate::domain::entities::message::{EVENT_MEMBER, EVENT_NAME, EVENT_POWER_LEVELS};
use crate::domain::entities::{PowerLevels, Room, RoomEvent, RoomMember, SyncEvent};
use crate::domain::traits::ChatClient;
use crate::infrastructure::config::MatrixConfig;
use crate::infrastructure::database::{Session, SessionStore};

const CLIENT_API: &str = "_matrix/client/v3";
const MEDIA_API: &str = "_matrix/media/v3";
/// Slack on top of the long-poll timeout before reqwest gives up
const SYNC_GRACE: Duration = Duration::from_secs(10);

/// Sync response, reduced to the parts the bot reads
#[derive(Debug, Default, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: SyncRooms,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncRooms {
    #[serde(default)]
    pub join: BTreeMap<String, JoinedRoom>,
    #[serde(default)]
    pub invite: BTreeMap<String, InvitedRoom>,
    #[serde(default)]
    pub leave: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub state: EventList,
    #[serde(default)]
    pub timeline: EventList,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvitedRoom {
    #[serde(default)]
    pub invite_state: EventList,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventList {
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(default)]
    pub event_id: Option<String>,
    pub sender: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub state_key: Option<String>,
    #[serde(default)]
    pub origin_server_ts: i64,
    #[serde(default)]
    pub content: Value,
}

impl RawEvent {
    fn into_room_event(self) -> Option<RoomEvent> {
        Some(RoomEvent {
            event_id: self.event_id?,
            sender: self.sender,
            event_type: self.event_type,
            origin_server_ts: self.origin_server_ts,
            content: self.content,
        })
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errcode: String,
    #[serde(default)]
    error: String,
}

/// Matrix chat client
pub struct MatrixAdapter {
    homeserver: String,
    user_id: String,
    device_id: Option<String>,
    encryption: bool,
    client: Client,
    store: Option<SessionStore>,
    session: Mutex<Option<Session>>,
    rooms: Mutex<BTreeMap<String, Room>>,
}

impl MatrixAdapter {
    pub fn new(config: &MatrixConfig, store: Option<SessionStore>) -> Self {
        Self {
            homeserver: config.homeserver_url.trim_end_matches('/').to_string(),
            user_id: config.user_id.clone(),
            device_id: config.device_id.clone(),
            encryption: config.enable_encryption,
            client: Client::new(),
            store,
            session: Mutex::new(None),
            rooms: Mutex::new(BTreeMap::new()),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn room_cache(&self) -> MutexGuard<'_, BTreeMap<String, Room>> {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn client_url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.homeserver, CLIENT_API, path)
    }

    fn access_token(&self) -> Result<String, ClientError> {
        self.session()
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or_else(|| ClientError::Login("not logged in".to_string()))
    }

    fn next_batch(&self) -> Option<String> {
        self.session().as_ref().and_then(|s| s.next_batch.clone())
    }

    fn authed(&self, method: Method, url: String) -> Result<RequestBuilder, ClientError> {
        Ok(self.client.request(method, url).bearer_auth(self.access_token()?))
    }

    async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body: ErrorBody = response.json().await.unwrap_or(ErrorBody {
                errcode: "M_UNKNOWN".to_string(),
                error: status.to_string(),
            });
            return Err(ClientError::Http {
                status: status.as_u16(),
                errcode: body.errcode,
                message: body.error,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Apply a sync response to the room cache and collect the events to dispatch.
    ///
    /// Timeline events are only emitted when `emit_timeline` is set, so the
    /// very first sync does not replay history.
    pub fn process_sync(&self, response: SyncResponse, emit_timeline: bool) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        let mut cache = self.room_cache();

        for room_id in response.rooms.leave.keys() {
            cache.remove(room_id);
        }

        for (room_id, joined) in response.rooms.join {
            let room = cache
                .entry(room_id.clone())
                .or_insert_with(|| Room::new(room_id.clone()));
            for event in &joined.state.events {
                apply_state_event(room, event);
            }

            for raw in joined.timeline.events {
                if raw.state_key.is_some() {
                    apply_state_event(room, &raw);
                }
                if !emit_timeline {
                    continue;
                }
                if let Some(event) = raw.into_room_event() {
                    let snapshot = room.clone();
                    events.push(if event.is_text_message() {
                        SyncEvent::Message { room: snapshot, event }
                    } else {
                        SyncEvent::Unknown { room: snapshot, event }
                    });
                }
            }
        }

        for (room_id, invited) in response.rooms.invite {
            let mut room = Room::new(room_id);
            let mut invite: Option<(String, bool)> = None;
            for event in &invited.invite_state.events {
                apply_state_event(&mut room, event);
                let membership = event.content.get("membership").and_then(Value::as_str);
                if event.event_type == EVENT_MEMBER
                    && event.state_key.as_deref() == Some(self.user_id.as_str())
                    && membership == Some("invite")
                {
                    let is_direct = event
                        .content
                        .get("is_direct")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    invite = Some((event.sender.clone(), is_direct));
                }
            }
            if let Some((sender, is_direct)) = invite {
                room.is_direct = is_direct;
                events.push(SyncEvent::Invite {
                    room,
                    sender,
                    is_direct,
                });
            }
        }

        events
    }

    fn store_next_batch(&self, next_batch: String) {
        let mut session = self.session();
        if let Some(session) = session.as_mut() {
            if let Some(store) = &self.store {
                if let Err(e) = store.update_next_batch(&session.user_id, &next_batch) {
                    warn!("Failed to persist sync token: {}", e);
                }
            }
            session.next_batch = Some(next_batch);
        }
    }

    /// Whether the homeserver still accepts the current access token
    async fn session_is_valid(&self) -> Result<bool, ClientError> {
        let request = self.authed(Method::GET, self.client_url("account/whoami"))?;
        match Self::execute::<Value>(request).await {
            Ok(_) => Ok(true),
            Err(ClientError::Http { status: 401, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn password_login(&self, password: &str, device_name: &str) -> Result<Session, ClientError> {
        #[derive(Deserialize)]
        struct LoginResponse {
            access_token: String,
            device_id: String,
            user_id: String,
        }

        let mut body = json!({
            "type": "m.login.password",
            "identifier": { "type": "m.id.user", "user": self.user_id },
            "password": password,
            "initial_device_display_name": device_name,
        });
        if let Some(device_id) = &self.device_id {
            body["device_id"] = json!(device_id);
        }

        let request = self.client.post(self.client_url("login")).json(&body);
        let response: LoginResponse = Self::execute(request).await.map_err(|e| match e {
            ClientError::Http { errcode, message, .. } => {
                ClientError::Login(format!("{}: {}", errcode, message))
            }
            other => other,
        })?;

        Ok(Session {
            user_id: response.user_id,
            device_id: response.device_id,
            access_token: response.access_token,
            next_batch: None,
        })
    }
}

fn apply_state_event(room: &mut Room, event: &RawEvent) {
    match event.event_type.as_str() {
        EVENT_MEMBER => {
            let user_id = match &event.state_key {
                Some(user_id) => user_id.clone(),
                None => return,
            };
            match event.content.get("membership").and_then(Value::as_str) {
                Some("join") => {
                    let display_name = event
                        .content
                        .get("displayname")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    room.users.insert(user_id, display_name);
                }
                Some("leave") | Some("ban") => {
                    room.users.remove(&user_id);
                }
                _ => {}
            }
        }
        EVENT_POWER_LEVELS => match serde_json::from_value::<PowerLevels>(event.content.clone()) {
            Ok(levels) => room.power_levels = levels,
            Err(e) => debug!("Ignoring malformed power levels in {}: {}", room.room_id, e),
        },
        EVENT_NAME => {
            room.name = event
                .content
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
        _ => {}
    }
}

fn encode(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

#[async_trait]
impl ChatClient for MatrixAdapter {
    fn user_id(&self) -> String {
        self.user_id.clone()
    }

    async fn login(&self, password: &str, device_name: &str) -> Result<(), ClientError> {
        if let Some(store) = &self.store {
            match store.load(&self.user_id) {
                Ok(Some(session)) => {
                    let device_id = session.device_id.clone();
                    *self.session() = Some(session);
                    if self.session_is_valid().await? {
                        info!("Reusing stored session for {} (device {})", self.user_id, device_id);
                        return Ok(());
                    }
                    warn!("Stored session for {} was rejected by the homeserver, logging in again", self.user_id);
                    *self.session() = None;
                    if let Err(e) = store.clear(&self.user_id) {
                        warn!("Failed to drop stored session: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to read stored session: {}", e),
            }
        }

        let session = self.password_login(password, device_name).await?;
        info!("Logged in as {} (device {})", session.user_id, session.device_id);
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&session) {
                warn!("Failed to persist session: {}", e);
            }
        }
        *self.session() = Some(session);
        Ok(())
    }

    async fn keys_upload(&self) -> Result<(), ClientError> {
        if self.encryption {
            warn!("End-to-end encryption is not supported, skipping key upload");
        }
        Ok(())
    }

    async fn sync_once(&self, timeout: Duration) -> Result<Vec<SyncEvent>, ClientError> {
        let since = self.next_batch();
        let mut query = vec![("timeout", timeout.as_millis().to_string())];
        if let Some(since) = &since {
            query.push(("since", since.clone()));
        }

        let request = self
            .authed(Method::GET, self.client_url("sync"))?
            .query(&query)
            .timeout(timeout + SYNC_GRACE);
        let response: SyncResponse = Self::execute(request).await?;

        let next_batch = response.next_batch.clone();
        let events = self.process_sync(response, since.is_some());
        self.store_next_batch(next_batch);
        Ok(events)
    }

    async fn room_send(&self, room_id: &str, event_type: &str, content: Value) -> Result<String, ClientError> {
        #[derive(Deserialize)]
        struct EventIdResponse {
            event_id: String,
        }

        let url = self.client_url(&format!(
            "rooms/{}/send/{}/{}",
            encode(room_id),
            encode(event_type),
            Uuid::new_v4().simple()
        ));
        let response: EventIdResponse = Self::execute(self.authed(Method::PUT, url)?.json(&content)).await?;
        Ok(response.event_id)
    }

    async fn room_redact(&self, room_id: &str, event_id: &str, reason: Option<&str>) -> Result<String, ClientError> {
        #[derive(Deserialize)]
        struct EventIdResponse {
            event_id: String,
        }

        let url = self.client_url(&format!(
            "rooms/{}/redact/{}/{}",
            encode(room_id),
            encode(event_id),
            Uuid::new_v4().simple()
        ));
        let body = match reason {
            Some(reason) => json!({ "reason": reason }),
            None => json!({}),
        };
        let response: EventIdResponse = Self::execute(self.authed(Method::PUT, url)?.json(&body)).await?;
        Ok(response.event_id)
    }

    async fn room_get_event(&self, room_id: &str, event_id: &str) -> Result<RoomEvent, ClientError> {
        let url = self.client_url(&format!("rooms/{}/event/{}", encode(room_id), encode(event_id)));
        Self::execute(self.authed(Method::GET, url)?).await
    }

    async fn upload(&self, data: Vec<u8>, content_type: &str, filename: &str) -> Result<String, ClientError> {
        #[derive(Deserialize)]
        struct UploadResponse {
            content_uri: String,
        }

        let url = format!("{}/{}/upload", self.homeserver, MEDIA_API);
        let request = self
            .authed(Method::POST, url)?
            .query(&[("filename", filename)])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data);
        let response: UploadResponse = Self::execute(request).await?;
        Ok(response.content_uri)
    }

    async fn joined_members(&self, room_id: &str) -> Result<Vec<RoomMember>, ClientError> {
        #[derive(Deserialize)]
        struct Member {
            display_name: Option<String>,
        }

        #[derive(Deserialize)]
        struct JoinedMembers {
            joined: BTreeMap<String, Member>,
        }

        let url = self.client_url(&format!("rooms/{}/joined_members", encode(room_id)));
        let response: JoinedMembers = Self::execute(self.authed(Method::GET, url)?).await?;
        Ok(response
            .joined
            .into_iter()
            .map(|(user_id, member)| RoomMember {
                user_id,
                display_name: member.display_name,
            })
            .collect())
    }

    async fn room_typing(&self, room_id: &str, typing: bool, timeout: Duration) -> Result<(), ClientError> {
        let url = self.client_url(&format!(
            "rooms/{}/typing/{}",
            encode(room_id),
            encode(&self.user_id)
        ));
        let body = if typing {
            json!({ "typing": true, "timeout": timeout.as_millis() as u64 })
        } else {
            json!({ "typing": false })
        };
        let _: Value = Self::execute(self.authed(Method::PUT, url)?.json(&body)).await?;
        Ok(())
    }

    async fn join(&self, room_id: &str) -> Result<(), ClientError> {
        let url = self.client_url(&format!("join/{}", encode(room_id)));
        let _: Value = Self::execute(self.authed(Method::POST, url)?.json(&json!({}))).await?;
        Ok(())
    }

    async fn leave(&self, room_id: &str) -> Result<(), ClientError> {
        let url = self.client_url(&format!("rooms/{}/leave", encode(room_id)));
        let _: Value = Self::execute(self.authed(Method::POST, url)?.json(&json!({}))).await?;
        self.room_cache().remove(room_id);
        Ok(())
    }

    async fn forget(&self, room_id: &str) -> Result<(), ClientError> {
        let url = self.client_url(&format!("rooms/{}/forget", encode(room_id)));
        let _: Value = Self::execute(self.authed(Method::POST, url)?.json(&json!({}))).await?;
        Ok(())
    }

    fn rooms(&self) -> BTreeMap<String, Room> {
        self.room_cache().clone()
    }

    async fn close(&self) {
        info!("Closing Matrix client for {}", self.user_id);
    }
}
