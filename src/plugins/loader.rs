//! Plugin loader - discovers plugins on disk, owns them and dispatches
//! commands, hooks and timers to them

use chrono::{Duration, NaiveDateTime};
use futures_util::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::module::{ModuleCatalogue, PluginModule};
use super::plugin::Plugin;
use super::registration::{PluginCommand, PluginHook};
use super::timer::Timer;
use crate::application::chat;
use crate::application::errors::PluginError;
use crate::domain::entities::{Command, PluginSummary, Room, RoomEvent};
use crate::domain::similarity::ratio;
use crate::domain::traits::ChatClient;
use crate::infrastructure::config::PluginsConfig;

/// Minimum wall-clock time between two timer ticks
pub const TIMER_TICK_INTERVAL_SECS: i64 = 30;

/// Commands whose similarity to the typed command is above this are candidates
pub const FUZZY_COMMAND_THRESHOLD: u8 = 60;

/// Result of [`PluginLoader::run_command`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command ran, or ran and failed inside the plugin
    Executed,
    /// No matching command, or not valid in this room
    NotFound,
    /// The sender's power level is below the command's requirement
    PowerLevelTooLow,
}

impl CommandOutcome {
    pub fn code(&self) -> u8 {
        match self {
            CommandOutcome::Executed => 0,
            CommandOutcome::NotFound => 1,
            CommandOutcome::PowerLevelTooLow => 2,
        }
    }
}

/// A plugin found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPlugin {
    pub name: String,
    pub is_directory_based: bool,
}

struct LoadedPlugin {
    module: Arc<dyn PluginModule>,
    plugin: Plugin,
}

pub struct PluginLoader {
    plugins_dir: PathBuf,
    plugins: BTreeMap<String, LoadedPlugin>,
}

impl PluginLoader {
    /// Discover, filter and construct all plugins
    pub fn load(config: &PluginsConfig, catalogue: &ModuleCatalogue, client: Arc<dyn ChatClient>) -> Self {
        if !config.allowlist.is_empty() {
            info!("Plugin allowlist: {:?}", config.allowlist);
        }
        if !config.denylist.is_empty() {
            info!("Plugin denylist: {:?}", config.denylist);
        }

        let mut loader = Self {
            plugins_dir: config.directory.clone(),
            plugins: BTreeMap::new(),
        };

        for found in discover(&config.directory) {
            if !config.is_allowed_plugin(&found.name) {
                info!("Skipping plugin {} as it hasn't been allowed by configuration.", found.name);
                continue;
            }
            if !found.is_directory_based {
                warn!(
                    "DEPRECATION WARNING: Single-file plugin {} detected. Move it into its own directory.",
                    found.name
                );
            }
            if let Some(loaded) = loader.construct(&found.name, catalogue, client.clone()) {
                loader.plugins.insert(found.name.clone(), loaded);
            }
        }

        for loaded in loader.plugins.values() {
            log_plugin(&loaded.plugin);
        }
        loader.warn_trigger_conflicts();
        loader
    }

    /// Loader over already constructed modules, bypassing discovery
    pub fn from_modules(
        plugins_dir: impl Into<PathBuf>,
        modules: Vec<Arc<dyn PluginModule>>,
        client: Arc<dyn ChatClient>,
    ) -> Self {
        let mut loader = Self {
            plugins_dir: plugins_dir.into(),
            plugins: BTreeMap::new(),
        };
        for module in modules {
            let name = module.name().to_string();
            if let Some(loaded) = loader.register(module, client.clone()) {
                loader.plugins.insert(name, loaded);
            }
        }
        loader.warn_trigger_conflicts();
        loader
    }

    /// Triggers declared by more than one plugin, with the owners in load order
    pub fn trigger_conflicts(&self) -> BTreeMap<String, Vec<String>> {
        let mut owners: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for plugin in self.get_plugins() {
            for trigger in plugin.commands().keys() {
                owners.entry(trigger.clone()).or_default().push(plugin.name.clone());
            }
        }
        owners.retain(|_, plugins| plugins.len() > 1);
        owners
    }

    fn warn_trigger_conflicts(&self) {
        for (trigger, plugins) in self.trigger_conflicts() {
            if let Some(winner) = plugins.last() {
                warn!(
                    "Command {} is declared by plugins {}; {} handles it",
                    trigger,
                    plugins.join(", "),
                    winner
                );
            }
        }
    }

    fn construct(&self, name: &str, catalogue: &ModuleCatalogue, client: Arc<dyn ChatClient>) -> Option<LoadedPlugin> {
        match catalogue.instantiate(name) {
            Some(module) => self.register(module, client),
            None => {
                error!("Error importing {}. No plugin module named {} is available.", name, name);
                None
            }
        }
    }

    fn register(&self, module: Arc<dyn PluginModule>, client: Arc<dyn ChatClient>) -> Option<LoadedPlugin> {
        let name = module.name().to_string();
        if self.plugins.contains_key(&name) {
            warn!("Plugin {} is already loaded, skipping duplicate", name);
            return None;
        }

        let mut plugin = Plugin::new(&name, module.category(), module.description(), &self.plugins_dir);
        plugin.set_client(client);

        let registered = std::panic::catch_unwind(AssertUnwindSafe(|| module.register(&mut plugin)));
        match registered {
            Ok(Ok(())) => Some(LoadedPlugin { module, plugin }),
            Ok(Err(PluginError::MissingConfig { .. })) => {
                error!("Error importing {} due to missing configuration items. Skipping.", name);
                None
            }
            Ok(Err(e)) => {
                error!("Error importing {} due to the following error: {}. Skipping.", name, e);
                None
            }
            Err(panic) => {
                error!(
                    "Error importing {} due to the following error: {}. Skipping.",
                    name,
                    panic_message(panic.as_ref())
                );
                None
            }
        }
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub async fn load_plugin_data(&mut self) {
        for loaded in self.plugins.values_mut() {
            loaded.plugin.load_data();
        }
    }

    pub async fn load_plugin_state(&mut self) {
        for loaded in self.plugins.values_mut() {
            loaded.plugin.load_state();
        }
    }

    /// Loaded plugins in name order
    pub fn get_plugins(&self) -> impl Iterator<Item = &Plugin> {
        self.plugins.values().map(|l| &l.plugin)
    }

    pub fn get_plugin_by_name(&self, name: &str) -> Option<&Plugin> {
        self.plugins.get(name).map(|l| &l.plugin)
    }

    pub fn get_plugin_by_name_mut(&mut self, name: &str) -> Option<&mut Plugin> {
        self.plugins.get_mut(name).map(|l| &mut l.plugin)
    }

    pub fn summaries(&self) -> Arc<Vec<PluginSummary>> {
        Arc::new(self.get_plugins().map(Plugin::summary).collect())
    }

    /// Every command of every plugin with the plugin that owns it.
    /// A trigger declared by several plugins resolves to the last one.
    pub fn get_commands(&self) -> BTreeMap<String, (String, PluginCommand)> {
        let mut commands = BTreeMap::new();
        for plugin in self.get_plugins() {
            for (trigger, command) in plugin.commands() {
                commands.insert(trigger.clone(), (plugin.name.clone(), command.clone()));
            }
        }
        commands
    }

    /// Hooks per event type, in plugin order, with the owning plugin
    pub fn get_hooks(&self) -> BTreeMap<String, Vec<(String, PluginHook)>> {
        let mut hooks: BTreeMap<String, Vec<(String, PluginHook)>> = BTreeMap::new();
        for plugin in self.get_plugins() {
            for (event_type, list) in plugin.hooks() {
                let entry = hooks.entry(event_type.clone()).or_default();
                entry.extend(list.iter().map(|h| (plugin.name.clone(), h.clone())));
            }
        }
        hooks
    }

    pub fn get_timers(&self) -> Vec<Timer> {
        self.get_plugins()
            .flat_map(|p| p.timers().iter().cloned())
            .collect()
    }

    /// Trigger for `head`: exact match first, then the closest fuzzy match
    pub fn resolve_command(&self, head: &str) -> Option<(String, String, PluginCommand)> {
        let commands = self.get_commands();
        if let Some((plugin, command)) = commands.get(head) {
            return Some((head.to_string(), plugin.clone(), command.clone()));
        }

        let mut best: Option<(u8, &String)> = None;
        for trigger in commands.keys() {
            let score = ratio(head, trigger);
            if score <= FUZZY_COMMAND_THRESHOLD {
                continue;
            }
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, trigger));
            }
        }

        let (score, trigger) = best?;
        debug!("Fuzzy matched {} to {} ({}%)", head, trigger, score);
        let (plugin, command) = commands.get(trigger)?;
        Some((trigger.clone(), plugin.clone(), command.clone()))
    }

    pub async fn run_command(&mut self, command: &Command) -> CommandOutcome {
        debug!("Running Command {} with args {:?}", command.command, command.args);

        let head = command.head();
        let (_trigger, plugin_name, plugin_command) = match self.resolve_command(&head) {
            Some(found) => found,
            None => return CommandOutcome::NotFound,
        };

        if !plugin_command.is_valid_for_room(command.room_id()) {
            return CommandOutcome::NotFound;
        }

        let level = command.room.power_levels.get_user_level(command.sender());
        if level < plugin_command.power_level {
            chat::send_text_to_room(
                command.client.as_ref(),
                command.room_id(),
                &format!("Required power level for command {} not met", command.command),
                true,
                true,
            )
            .await;
            return CommandOutcome::PowerLevelTooLow;
        }

        let loaded = match self.plugins.get_mut(&plugin_name) {
            Some(loaded) => loaded,
            None => return CommandOutcome::NotFound,
        };
        let module = loaded.module.clone();
        let label = format!("{} (command {})", plugin_command.method, head);
        invoke(&label, module.command(&plugin_command.method, &mut loaded.plugin, command)).await;

        CommandOutcome::Executed
    }

    /// Run every hook for `event_type` that matches the room and event
    pub async fn run_hooks(&mut self, client: Arc<dyn ChatClient>, event_type: &str, room: &Room, event: &RoomEvent) {
        let hooks = match self.get_hooks().remove(event_type) {
            Some(hooks) => hooks,
            None => return,
        };
        let relates_to = event.relates_to_event_id();

        for (plugin_name, hook) in hooks {
            if !hook.matches_room(&room.room_id) || !hook.matches_event(relates_to) {
                continue;
            }
            let loaded = match self.plugins.get_mut(&plugin_name) {
                Some(loaded) => loaded,
                None => continue,
            };
            let module = loaded.module.clone();
            let label = format!("hook {} on {} for {}", hook.method, room.room_id, event.event_id);
            invoke(
                &label,
                module.hook(&hook.method, &mut loaded.plugin, client.clone(), room, event),
            )
            .await;
        }
    }

    /// Fire all due timers, at most once every 30 seconds.
    ///
    /// Returns the timestamp to pass as `last_tick` next time.
    pub async fn run_timers(
        &mut self,
        client: Arc<dyn ChatClient>,
        last_tick: NaiveDateTime,
        now: NaiveDateTime,
    ) -> NaiveDateTime {
        if now.signed_duration_since(last_tick) < Duration::seconds(TIMER_TICK_INTERVAL_SECS) {
            return last_tick;
        }

        let mut affected: BTreeSet<String> = BTreeSet::new();
        let names: Vec<String> = self.plugins.keys().cloned().collect();

        for plugin_name in names {
            let loaded = match self.plugins.get_mut(&plugin_name) {
                Some(loaded) => loaded,
                None => continue,
            };
            let module = loaded.module.clone();
            let timers: Vec<Timer> = loaded.plugin.timers().to_vec();

            for timer in timers {
                if !timer.should_trigger(now) {
                    continue;
                }
                let label = format!("timer {}", timer.name);
                let fired = invoke(
                    &label,
                    module.timer(&timer.method, &mut loaded.plugin, client.clone()),
                )
                .await;
                if !fired {
                    continue;
                }

                debug!("Timer {} triggered", timer.name);
                if let Some(live) = loaded.plugin.timer_mut(&timer.name) {
                    live.mark_executed(now);
                }
                affected.insert(timer.plugin_name().to_string());
            }
        }

        for name in affected {
            if let Some(loaded) = self.plugins.get(&name) {
                loaded.plugin.save_state();
            }
        }
        now
    }
}

/// Plugins below `dir`: subdirectories, and `<name>.yaml` single-file plugins.
/// Hidden entries are skipped; the result is sorted by name.
pub fn discover(dir: &Path) -> Vec<DiscoveredPlugin> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Plugin directory {} could not be read: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut found: BTreeMap<String, bool> = BTreeMap::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Failed to read directory entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if file_name.starts_with('.') {
            continue;
        }

        if path.is_dir() {
            found.insert(file_name, true);
        } else if let Some(stem) = file_name.strip_suffix(".yaml") {
            found.entry(stem.to_string()).or_insert(false);
        }
    }

    found
        .into_iter()
        .map(|(name, is_directory_based)| DiscoveredPlugin {
            name,
            is_directory_based,
        })
        .collect()
}

/// Await a plugin method, catching both errors and panics
async fn invoke<F>(label: &str, fut: F) -> bool
where
    F: Future<Output = Result<(), PluginError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Plugin failed to catch exception caused by {}: {}", label, e);
            false
        }
        Err(panic) => {
            error!(
                "Plugin panicked in {}: {}",
                label,
                panic_message(panic.as_ref())
            );
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_plugin(plugin: &Plugin) {
    info!("Loaded plugin {}:", plugin.name);
    if !plugin.commands().is_empty() {
        let names: Vec<&str> = plugin.commands().keys().map(String::as_str).collect();
        info!("  Commands: {}", names.join(", "));
    }
    if !plugin.hooks().is_empty() {
        let names: Vec<&str> = plugin.hooks().keys().map(String::as_str).collect();
        info!("  Hooks:    {}", names.join(", "));
    }
    if !plugin.timers().is_empty() {
        let timers: Vec<String> = plugin
            .timers()
            .iter()
            .map(|t| match &t.frequency {
                Some(f) => format!("{} ({})", t.name, f),
                None => format!("{} (every tick)", t.name),
            })
            .collect();
        info!("  Timers:   {}", timers.join(", "));
    }
}
