//! Outgoing chat helpers against the console adapter

mod common;

use common::*;
use image::{DynamicImage, Rgba, RgbaImage};
use tempfile::TempDir;

use plugbot::application::chat::media::send_image_via;
use plugbot::plugins::{Plugin, SendOptions};

fn plugin(dir: &TempDir) -> Plugin {
    Plugin::new("recorder", "General", "Recorder", dir.path())
}

fn checkerboard() -> DynamicImage {
    let image = RgbaImage::from_fn(8, 6, |x, y| {
        if (x + y) % 2 == 0 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([20, 40, 200, 255])
        }
    });
    DynamicImage::ImageRgba8(image)
}

fn is_empty_dir(dir: &TempDir) -> bool {
    std::fs::read_dir(dir.path()).unwrap().next().is_none()
}

#[tokio::test]
async fn replacing_with_identical_text_sends_nothing() {
    let dir = TempDir::new().unwrap();
    let adapter = adapter();
    let plugin = plugin(&dir);

    let original = plugin
        .send_message(adapter.as_ref(), ROOM, "x", &SendOptions::default())
        .await
        .unwrap();
    assert_eq!(adapter.sent_events().len(), 1);

    let unchanged = plugin
        .replace_message(adapter.as_ref(), ROOM, &original, "x", None)
        .await;
    assert_eq!(unchanged, None);
    assert_eq!(adapter.sent_events().len(), 1);

    let edited = plugin
        .replace_message(adapter.as_ref(), ROOM, &original, "y", None)
        .await;
    assert!(edited.is_some());

    let sent = adapter.sent_events();
    let edits: Vec<_> = sent
        .iter()
        .filter(|(_, e)| e.content["m.relates_to"]["rel_type"] == "m.replace")
        .collect();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].1.content["m.relates_to"]["event_id"], original.as_str());
    assert_eq!(edits[0].1.content["m.new_content"]["body"], "y");
}

#[tokio::test]
async fn replacing_unknown_event_sends_nothing() {
    let dir = TempDir::new().unwrap();
    let adapter = adapter();
    let plugin = plugin(&dir);

    let result = plugin
        .replace_notice(adapter.as_ref(), ROOM, "$missing", "text", None)
        .await;
    assert_eq!(result, None);
    assert!(adapter.sent_events().is_empty());
}

#[tokio::test]
async fn expanded_messages_use_details_markup() {
    let dir = TempDir::new().unwrap();
    let adapter = adapter();
    let plugin = plugin(&dir);

    let options = SendOptions::default().expanded("the *long* part");
    plugin
        .send_notice(adapter.as_ref(), ROOM, "summary", &options)
        .await
        .unwrap();

    let (_, event) = &adapter.sent_events()[0];
    assert_eq!(event.msgtype(), Some("m.notice"));
    let formatted = event.formatted_body().unwrap();
    assert!(formatted.starts_with("<details><summary>"));
    assert!(formatted.contains("<em>long</em>"));
    assert!(!event.body().unwrap().contains("<details>"));
}

#[tokio::test]
async fn reactions_and_redactions_reference_the_target() {
    let dir = TempDir::new().unwrap();
    let adapter = adapter();
    let plugin = plugin(&dir);

    let target = plugin
        .send_message(adapter.as_ref(), ROOM, "vote here", &SendOptions::default())
        .await
        .unwrap();
    plugin
        .send_reaction(adapter.as_ref(), ROOM, &target, "👍")
        .await
        .unwrap();
    plugin
        .redact_message(adapter.as_ref(), ROOM, &target, Some("closed"))
        .await
        .unwrap();

    let sent = adapter.sent_events();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[1].1.event_type, "m.reaction");
    assert_eq!(sent[1].1.content["m.relates_to"]["key"], "👍");
    assert_eq!(sent[2].1.event_type, "m.room.redaction");
    assert_eq!(sent[2].1.content["redacts"], target.as_str());
}

#[tokio::test]
async fn failed_send_returns_none() {
    let dir = TempDir::new().unwrap();
    let adapter = adapter();
    adapter.set_fail_sends(true);
    let plugin = plugin(&dir);

    let result = plugin
        .send_message(adapter.as_ref(), ROOM, "lost", &SendOptions::default())
        .await;
    assert_eq!(result, None);
}

#[tokio::test]
async fn image_upload_removes_staged_file() {
    let staging = TempDir::new().unwrap();
    let adapter = adapter();

    let event_id = send_image_via(adapter.as_ref(), ROOM, &checkerboard(), staging.path())
        .await
        .unwrap();

    assert!(is_empty_dir(&staging));
    assert_eq!(adapter.uploads().len(), 1);

    let (_, event) = &adapter.sent_events()[0];
    assert_eq!(event.event_id, event_id);
    assert_eq!(event.msgtype(), Some("m.image"));
    assert_eq!(event.content["info"]["mimetype"], "image/png");
    assert_eq!(event.content["info"]["w"], 8);
    assert_eq!(event.content["info"]["h"], 6);
    assert!(event.content["info"]["xyz.amorgan.blurhash"].is_string());
    assert!(event.content["url"].as_str().unwrap().starts_with("mxc://"));
}

#[tokio::test]
async fn failed_upload_still_removes_staged_file() {
    let staging = TempDir::new().unwrap();
    let adapter = adapter();
    adapter.set_fail_uploads(true);

    let result = send_image_via(adapter.as_ref(), ROOM, &checkerboard(), staging.path()).await;

    assert_eq!(result, None);
    assert!(is_empty_dir(&staging));
    assert!(adapter.sent_events().is_empty());
}
