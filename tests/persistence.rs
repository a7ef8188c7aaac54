//! Plugin data, legacy migration and registration state across restarts

mod common;

use common::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

use plugbot::domain::entities::RoomEvent;
use plugbot::domain::traits::ChatClient;
use plugbot::plugins::{Plugin, PluginLoader, PluginState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Scoreboard {
    round: u32,
    scores: BTreeMap<String, i64>,
}

#[test]
fn data_survives_a_restart() {
    let dir = TempDir::new().unwrap();
    plugin_dirs(dir.path(), &["quiz"]);

    let board = Scoreboard {
        round: 3,
        scores: BTreeMap::from([("@alice:h".to_string(), 12), ("@bob:h".to_string(), -1)]),
    };
    let mut plugin = Plugin::new("quiz", "Games", "Quiz", dir.path());
    assert!(plugin.store_data("board", &board));
    assert!(plugin.store_data("last_winner", &"@alice:h".to_string()));

    let data_file = dir.path().join("quiz").join("quiz.json");
    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&data_file).unwrap()).unwrap();
    assert_eq!(raw["version"], json!(1));
    assert_eq!(raw["data"]["board"]["value"]["round"], json!(3));

    let mut reloaded = Plugin::new("quiz", "Games", "Quiz", dir.path());
    reloaded.load_data();
    assert_eq!(reloaded.read_data::<Scoreboard>("board"), Some(board));
    assert_eq!(reloaded.read_data::<String>("last_winner").as_deref(), Some("@alice:h"));

    assert!(reloaded.clear_data("board"));
    assert!(reloaded.clear_data("last_winner"));
    assert!(!data_file.exists());
}

#[test]
fn legacy_pickle_is_migrated_to_json() {
    let dir = TempDir::new().unwrap();
    plugin_dirs(dir.path(), &["karma"]);

    let legacy: BTreeMap<String, serde_json::Value> = BTreeMap::from([
        ("count".to_string(), json!(42)),
        ("names".to_string(), json!(["alice", "bob"])),
    ]);
    let bytes = serde_pickle::to_vec(&legacy, serde_pickle::SerOptions::new()).unwrap();
    std::fs::write(dir.path().join("karma").join("karma.pkl"), bytes).unwrap();

    let mut plugin = Plugin::new("karma", "Fun", "Karma", dir.path());
    plugin.load_data();

    assert_eq!(plugin.read_data::<i64>("count"), Some(42));
    assert_eq!(plugin.read_data::<Vec<String>>("names"), Some(vec!["alice".to_string(), "bob".to_string()]));
    assert!(dir.path().join("karma").join("karma.json").exists());

    let mut reloaded = Plugin::new("karma", "Fun", "Karma", dir.path());
    reloaded.load_data();
    assert_eq!(reloaded.read_data::<i64>("count"), Some(42));
}

#[test]
fn abandoned_top_level_file_is_moved_into_plugin_directory() {
    let dir = TempDir::new().unwrap();
    plugin_dirs(dir.path(), &["quotes"]);
    std::fs::write(dir.path().join("quotes.json"), r#"{"motd": "hello"}"#).unwrap();

    let mut plugin = Plugin::new("quotes", "Fun", "Quotes", dir.path());
    plugin.load_data();

    assert_eq!(plugin.read_data::<String>("motd").as_deref(), Some("hello"));
    assert!(dir.path().join("quotes").join("quotes.json").exists());
}

#[test]
fn backup_copies_current_data() {
    let dir = TempDir::new().unwrap();
    plugin_dirs(dir.path(), &["quiz"]);

    let mut plugin = Plugin::new("quiz", "Games", "Quiz", dir.path());
    assert!(plugin.store_data("round", &7u32));
    assert!(plugin.backup_data());

    let backups: Vec<_> = std::fs::read_dir(dir.path().join("quiz"))
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with("quiz.json.bak."))
        .collect();
    assert_eq!(backups.len(), 1);
}

#[tokio::test]
async fn timer_execution_is_persisted_and_restored() {
    let dir = TempDir::new().unwrap();
    plugin_dirs(dir.path(), &["recorder"]);
    let adapter = adapter();
    let client: Arc<dyn ChatClient> = adapter.clone();

    let (recorder, recorded) = RecorderPlugin::new();
    let mut loader = PluginLoader::from_modules(dir.path(), vec![recorder], client.clone());
    let fired_at = at(2024, 5, 1, 8, 0, 0);
    loader
        .run_timers(client.clone(), chrono::NaiveDateTime::MIN, fired_at)
        .await;
    assert_eq!(calls(&recorded), vec!["tick"]);

    let state_file = dir.path().join("recorder").join("recorder_state.json");
    let state: PluginState = serde_json::from_slice(&std::fs::read(&state_file).unwrap()).unwrap();
    assert_eq!(state.timers.len(), 1);
    assert_eq!(state.timers[0].name, "recorder.tick");
    assert_eq!(state.timers[0].last_execution, Some(fired_at));

    let (recorder, recorded) = RecorderPlugin::new();
    let mut restarted = PluginLoader::from_modules(dir.path(), vec![recorder], client.clone());
    restarted.load_plugin_state().await;
    let timer = &restarted.get_plugin_by_name("recorder").unwrap().timers()[0];
    assert_eq!(timer.last_execution, Some(fired_at));

    restarted
        .run_timers(client.clone(), chrono::NaiveDateTime::MIN, at(2024, 5, 1, 20, 0, 0))
        .await;
    assert!(calls(&recorded).is_empty());

    restarted
        .run_timers(client, chrono::NaiveDateTime::MIN, at(2024, 5, 2, 0, 0, 1))
        .await;
    assert_eq!(calls(&recorded), vec!["tick"]);
}

#[tokio::test]
async fn dynamic_hooks_survive_a_restart() {
    let dir = TempDir::new().unwrap();
    plugin_dirs(dir.path(), &["recorder"]);
    let adapter = adapter();

    let (recorder, _) = RecorderPlugin::new();
    let mut first = dispatcher(dir.path(), adapter.clone(), vec![recorder]);
    first
        .on_message(&room(), &RoomEvent::text("$1", "@alice:h", "!watch $target"))
        .await;
    let plugin = first.loader().get_plugin_by_name("recorder").unwrap();
    assert!(plugin.has_hook("m.reaction", "on_watched", None));

    let (recorder, recorded) = RecorderPlugin::new();
    let mut restarted = dispatcher(dir.path(), adapter.clone(), vec![recorder]);
    restarted.loader_mut().load_plugin_state().await;

    let hooks = restarted.loader().get_hooks();
    let reaction_hooks = &hooks["m.reaction"];
    assert_eq!(reaction_hooks.len(), 1);
    assert_eq!(reaction_hooks[0].0, "recorder");
    assert_eq!(reaction_hooks[0].1.event_ids, Some(vec!["$target".to_string()]));

    restarted
        .on_unknown(&room(), &RoomEvent::reaction("$2", "@bob:h", "$target", "🎉"))
        .await;
    assert_eq!(calls(&recorded), vec!["watched:🎉"]);
}

#[tokio::test]
async fn removing_the_last_dynamic_hook_clears_state() {
    let dir = TempDir::new().unwrap();
    plugin_dirs(dir.path(), &["recorder"]);
    let adapter = adapter();

    let (recorder, _) = RecorderPlugin::new();
    let mut dispatcher = dispatcher(dir.path(), adapter.clone(), vec![recorder]);
    dispatcher
        .on_message(&room(), &RoomEvent::text("$1", "@alice:h", "!watch $target"))
        .await;

    let plugin = dispatcher.loader_mut().get_plugin_by_name_mut("recorder").unwrap();
    assert!(plugin.del_hook("m.reaction", "on_watched", None));
    assert!(!plugin.has_hook("m.reaction", "on_watched", None));
    assert!(!plugin.del_hook("m.room.message", "on_message", None));

    let state: PluginState = plugin.store().load_state().unwrap();
    assert!(state.hooks.is_empty());
}
