//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::path::Path;
use std::sync::{Arc, Mutex};

use plugbot::application::errors::PluginError;
use plugbot::application::messaging::EventDispatcher;
use plugbot::domain::entities::{Command, Room, RoomEvent};
use plugbot::domain::traits::ChatClient;
use plugbot::infrastructure::adapters::ConsoleAdapter;
use plugbot::infrastructure::config::BotConfig;
use plugbot::plugins::builtin::{EchoPlugin, HelpPlugin};
use plugbot::plugins::module::unknown_method;
use plugbot::plugins::{Frequency, Plugin, PluginCommand, PluginHook, PluginLoader, PluginModule, RegistrationType};

pub const BOT: &str = "@bot:h";
pub const ROOM: &str = "!room:h";

pub type Calls = Arc<Mutex<Vec<String>>>;

/// Records every invocation so tests can see what ran
pub struct RecorderPlugin {
    pub calls: Calls,
}

impl RecorderPlugin {
    pub fn new() -> (Arc<dyn PluginModule>, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        (Arc::new(Self { calls: calls.clone() }), calls)
    }

    fn record(&self, entry: impl Into<String>) {
        self.calls.lock().unwrap().push(entry.into());
    }
}

#[async_trait]
impl PluginModule for RecorderPlugin {
    fn name(&self) -> &str {
        "recorder"
    }

    fn description(&self) -> &str {
        "Records what it is asked to do"
    }

    fn register(&self, plugin: &mut Plugin) -> Result<(), PluginError> {
        plugin.add_command(PluginCommand::new("admin", "admin", "privileged").with_power_level(50));
        plugin.add_command(PluginCommand::new("watch", "watch", "watch reactions to an event"));
        plugin.add_command(PluginCommand::new("boom", "boom", "always fails"));
        plugin.add_hook(PluginHook::new("m.room.message", "on_message"));
        plugin.add_timer("tick", Some(Frequency::Daily), RegistrationType::Static);
        Ok(())
    }

    async fn command(&self, method: &str, plugin: &mut Plugin, command: &Command) -> Result<(), PluginError> {
        match method {
            "admin" => {
                self.record("admin");
                Ok(())
            }
            "watch" => {
                let event_id = command.args.first().cloned().unwrap_or_default();
                plugin.add_hook(
                    PluginHook::new("m.reaction", "on_watched")
                        .with_event_ids(vec![event_id.clone()])
                        .dynamic(),
                );
                self.record(format!("watch:{}", event_id));
                Ok(())
            }
            "boom" => panic!("boom"),
            _ => Err(unknown_method(plugin, method)),
        }
    }

    async fn hook(
        &self,
        method: &str,
        plugin: &mut Plugin,
        _client: Arc<dyn ChatClient>,
        _room: &Room,
        event: &RoomEvent,
    ) -> Result<(), PluginError> {
        match method {
            "on_message" => {
                self.record(format!("message:{}", event.body().unwrap_or_default()));
                Ok(())
            }
            "on_watched" => {
                self.record(format!("watched:{}", event.reaction_key().unwrap_or_default()));
                Ok(())
            }
            _ => Err(unknown_method(plugin, method)),
        }
    }

    async fn timer(&self, method: &str, plugin: &mut Plugin, _client: Arc<dyn ChatClient>) -> Result<(), PluginError> {
        match method {
            "tick" => {
                self.record("tick");
                Ok(())
            }
            _ => Err(unknown_method(plugin, method)),
        }
    }
}

pub fn room() -> Room {
    Room::new(ROOM)
        .with_name("test room")
        .with_member(BOT, Some("bot"))
        .with_member("@alice:h", Some("Alice"))
        .with_member("@bob:h", Some("Bob"))
        .with_power_level("@alice:h", 100)
}

pub fn adapter() -> Arc<ConsoleAdapter> {
    let adapter = Arc::new(ConsoleAdapter::new(BOT));
    adapter.add_room(room());
    adapter
}

/// Directory-based plugin folders for `names` below `dir`
pub fn plugin_dirs(dir: &Path, names: &[&str]) {
    for name in names {
        std::fs::create_dir_all(dir.join(name)).unwrap();
    }
}

pub fn dispatcher(dir: &Path, adapter: Arc<ConsoleAdapter>, modules: Vec<Arc<dyn PluginModule>>) -> EventDispatcher {
    dispatcher_with_botmasters(dir, adapter, modules, Vec::new())
}

pub fn dispatcher_with_botmasters(
    dir: &Path,
    adapter: Arc<ConsoleAdapter>,
    modules: Vec<Arc<dyn PluginModule>>,
    botmasters: Vec<String>,
) -> EventDispatcher {
    let client: Arc<dyn ChatClient> = adapter;
    let loader = PluginLoader::from_modules(dir, modules, client.clone());
    let bot = BotConfig {
        botmasters,
        ..BotConfig::default()
    };
    EventDispatcher::new(client, bot, loader)
}

pub fn echo() -> Arc<dyn PluginModule> {
    Arc::new(EchoPlugin)
}

pub fn help() -> Arc<dyn PluginModule> {
    Arc::new(HelpPlugin)
}

pub fn echo_and_recorder() -> (Vec<Arc<dyn PluginModule>>, Calls) {
    let (recorder, calls) = RecorderPlugin::new();
    (vec![echo(), recorder], calls)
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, s)
        .unwrap()
}

/// Drain everything queued on the adapter through the dispatcher
pub async fn sync_into(adapter: &ConsoleAdapter, dispatcher: &mut EventDispatcher) {
    let events = adapter
        .sync_once(std::time::Duration::from_millis(10))
        .await
        .unwrap();
    for event in events {
        dispatcher.dispatch(event).await;
    }
}

pub fn calls(calls: &Calls) -> Vec<String> {
    calls.lock().unwrap().clone()
}
