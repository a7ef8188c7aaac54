//! Chat helpers - send, edit, react and redact on top of a `ChatClient`
//!
//! Every helper returns the server-assigned event id, or `None` after logging
//! when the client reported an error. Nothing is retried here.

pub mod format;
pub mod media;

use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::entities::message::{EVENT_MESSAGE, EVENT_REACTION};
use crate::domain::traits::ChatClient;

pub use format::{expandable_message_body, markdown_to_html, strip_tags};
pub use media::{fetch_image_from_url, send_image};

/// Upper bound for typing-indicator delays
pub const MAX_TYPING_DELAY_MS: u64 = 1000;

/// Send text to a room as `m.notice` (no mentions) or `m.text`
pub async fn send_text_to_room(
    client: &dyn ChatClient,
    room_id: &str,
    message: &str,
    notice: bool,
    markdown_convert: bool,
) -> Option<String> {
    let msgtype = if notice { "m.notice" } else { "m.text" };
    let content = format::message_content(message, msgtype, markdown_convert);

    match client.room_send(room_id, EVENT_MESSAGE, content).await {
        Ok(event_id) => Some(event_id),
        Err(e) => {
            warn!("Unable to send message to {}: {}", room_id, e);
            None
        }
    }
}

/// Show a typing notification for `delay_ms` (clamped to 1000ms)
pub async fn typing_delay(client: &dyn ChatClient, room_id: &str, delay_ms: u64) {
    if delay_ms == 0 {
        return;
    }
    let delay = Duration::from_millis(delay_ms.min(MAX_TYPING_DELAY_MS));

    if let Err(e) = client.room_typing(room_id, true, delay).await {
        debug!("Typing notification for {} failed: {}", room_id, e);
    }
    tokio::time::sleep(delay).await;
    if let Err(e) = client.room_typing(room_id, false, delay).await {
        debug!("Typing notification for {} failed: {}", room_id, e);
    }
}

/// React to `event_id` with `key`
pub async fn send_reaction(client: &dyn ChatClient, room_id: &str, event_id: &str, key: &str) -> Option<String> {
    let content = format::reaction_content(event_id, key);
    match client.room_send(room_id, EVENT_REACTION, content).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Unable to react to {} in {}: {}", event_id, room_id, e);
            None
        }
    }
}

/// Edit `event_id` so it reads `message`.
///
/// Fetches the original event first and only sends the `m.replace` event if
/// the plain or the HTML body actually changes. Returns `None` when nothing
/// was sent.
pub async fn send_replace(
    client: &dyn ChatClient,
    room_id: &str,
    event_id: &str,
    message: &str,
    msgtype: &str,
) -> Option<String> {
    let original = match client.room_get_event(room_id, event_id).await {
        Ok(event) => event,
        Err(e) => {
            warn!("Unable to fetch {} from {} for replacement: {}", event_id, room_id, e);
            return None;
        }
    };

    if original.content.as_object().map_or(true, |c| c.is_empty()) {
        return None;
    }

    let content = format::replace_content(event_id, message, msgtype);
    let unchanged = content.get("body").and_then(|v| v.as_str()) == original.body()
        && content.get("formatted_body").and_then(|v| v.as_str()) == original.formatted_body();
    if unchanged {
        debug!("Content of {} unchanged, not replacing", event_id);
        return None;
    }

    match client.room_send(room_id, EVENT_MESSAGE, content).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Unable to replace {} in {}: {}", event_id, room_id, e);
            None
        }
    }
}

/// Redact `event_id`
pub async fn redact(client: &dyn ChatClient, room_id: &str, event_id: &str, reason: Option<&str>) -> Option<String> {
    match client.room_redact(room_id, event_id, reason).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Unable to redact {} in {}: {}", event_id, room_id, e);
            None
        }
    }
}
