//! Image upload and retrieval

use image::{DynamicImage, GenericImageView, ImageFormat};
use serde_json::json;
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

use crate::application::errors::ClientError;
use crate::domain::entities::message::EVENT_MESSAGE;
use crate::domain::traits::ChatClient;

const PNG_MIME: &str = "image/png";
const BLURHASH_X: u32 = 4;
const BLURHASH_Y: u32 = 3;

/// Upload `image` as PNG and post it to `room_id`
pub async fn send_image(client: &dyn ChatClient, room_id: &str, image: &DynamicImage) -> Option<String> {
    send_image_via(client, room_id, image, &std::env::temp_dir()).await
}

/// Like [`send_image`], staging the PNG in `temp_dir`.
///
/// The staged file is removed again whether or not the upload worked.
pub async fn send_image_via(
    client: &dyn ChatClient,
    room_id: &str,
    image: &DynamicImage,
    temp_dir: &Path,
) -> Option<String> {
    let filename = format!("{}.png", Uuid::new_v4().simple());
    let temp_path = temp_dir.join(&filename);

    if let Err(e) = image.save_with_format(&temp_path, ImageFormat::Png) {
        warn!("Failed to save temporary image {}: {}", temp_path.display(), e);
        return None;
    }

    let result = upload_and_send(client, room_id, image, &temp_path, &filename).await;

    if let Err(e) = tokio::fs::remove_file(&temp_path).await {
        warn!("Failed to remove temporary image file {}: {}", temp_path.display(), e);
    }

    match result {
        Ok(event_id) => Some(event_id),
        Err(e) => {
            warn!("Failed to send image to {}: {}", room_id, e);
            None
        }
    }
}

async fn upload_and_send(
    client: &dyn ChatClient,
    room_id: &str,
    image: &DynamicImage,
    path: &Path,
    filename: &str,
) -> Result<String, ClientError> {
    let data = tokio::fs::read(path)
        .await
        .map_err(|e| ClientError::Decode(e.to_string()))?;
    let size = data.len();
    let (width, height) = image.dimensions();

    let rgba = image.to_rgba8();
    let hash = blurhash::encode(BLURHASH_X, BLURHASH_Y, width, height, rgba.as_raw())
        .map_err(|e| ClientError::Decode(format!("blurhash: {:?}", e)))?;

    let content_uri = client.upload(data, PNG_MIME, filename).await?;

    let content = json!({
        "body": filename,
        "info": {
            "size": size,
            "mimetype": PNG_MIME,
            "w": width,
            "h": height,
            "xyz.amorgan.blurhash": hash,
        },
        "msgtype": "m.image",
        "url": content_uri,
    });

    client.room_send(room_id, EVENT_MESSAGE, content).await
}

/// Best-effort download and decode of an image
pub async fn fetch_image_from_url(url: &str) -> Option<DynamicImage> {
    let response = match reqwest::get(url).await {
        Ok(r) => r,
        Err(e) => {
            warn!("Failed to fetch image from {}: {}", url, e);
            return None;
        }
    };

    let bytes = match response.error_for_status() {
        Ok(r) => r.bytes().await.ok()?,
        Err(e) => {
            warn!("Failed to fetch image from {}: {}", url, e);
            return None;
        }
    };

    image::load_from_memory(&bytes).ok()
}
