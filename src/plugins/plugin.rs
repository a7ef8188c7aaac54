//! A loaded plugin: its registries, configuration, durable data and the
//! helper API plugin code calls

use chrono::Local;
use image::DynamicImage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::members::{self, Strictness};
use super::registration::{PluginCommand, PluginHook, RegistrationType};
use super::timer::{Frequency, Timer};
use crate::application::chat;
use crate::application::errors::PluginError;
use crate::domain::entities::{Command, CommandSummary, PluginSummary, RoomMember};
use crate::domain::traits::ChatClient;
use crate::infrastructure::storage::{DataEntry, PluginData, PluginStore};

/// Snapshot written to `P_state.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginState {
    #[serde(default)]
    pub commands: BTreeMap<String, PluginCommand>,
    #[serde(default)]
    pub hooks: BTreeMap<String, Vec<PluginHook>>,
    #[serde(default)]
    pub timers: Vec<Timer>,
}

impl PluginState {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.hooks.is_empty() && self.timers.is_empty()
    }
}

/// Options for outgoing messages
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Part of the message shown only after expanding it
    pub expanded: Option<String>,
    /// Typing indicator before sending, clamped to 1000ms
    pub delay_ms: u64,
    pub markdown: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            expanded: None,
            delay_ms: 0,
            markdown: true,
        }
    }
}

impl SendOptions {
    pub fn expanded(mut self, text: impl Into<String>) -> Self {
        self.expanded = Some(text.into());
        self
    }

    pub fn delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn plain(mut self) -> Self {
        self.markdown = false;
        self
    }
}

pub struct Plugin {
    pub name: String,
    pub category: String,
    pub description: String,
    commands: BTreeMap<String, PluginCommand>,
    help_texts: BTreeMap<String, String>,
    hooks: BTreeMap<String, Vec<PluginHook>>,
    timers: Vec<Timer>,
    rooms: Vec<String>,
    configuration: Option<serde_yaml::Mapping>,
    config_items: BTreeMap<String, Option<serde_yaml::Value>>,
    plugin_data: PluginData,
    store: PluginStore,
    client: Option<Arc<dyn ChatClient>>,
    pub doc_url: Option<String>,
}

impl Plugin {
    /// Create the plugin and read its configuration file from `plugins_dir`
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        description: impl Into<String>,
        plugins_dir: &Path,
    ) -> Self {
        let name = name.into();
        let store = PluginStore::new(plugins_dir, &name);
        let configuration = store.load_config();
        debug!("{}: Configuration loaded from file: {:?}", name, configuration);

        let mut plugin = Self {
            name,
            category: category.into(),
            description: description.into(),
            commands: BTreeMap::new(),
            help_texts: BTreeMap::new(),
            hooks: BTreeMap::new(),
            timers: Vec::new(),
            rooms: Vec::new(),
            configuration,
            config_items: BTreeMap::new(),
            plugin_data: PluginData::new(),
            store,
            client: None,
            doc_url: None,
        };

        // not required, so this cannot fail
        let _ = plugin.add_config("doc_url", None, false);
        plugin.doc_url = plugin.read_config_as("doc_url");
        plugin
    }

    pub fn is_directory_based(&self) -> bool {
        self.store.is_directory_based()
    }

    pub fn store(&self) -> &PluginStore {
        &self.store
    }

    /// A plugin without room restrictions is valid everywhere
    pub fn is_valid_for_room(&self, room_id: &str) -> bool {
        self.rooms.is_empty() || self.rooms.iter().any(|r| r == room_id)
    }

    pub fn rooms(&self) -> &[String] {
        &self.rooms
    }

    pub fn commands(&self) -> &BTreeMap<String, PluginCommand> {
        &self.commands
    }

    pub fn help_texts(&self) -> &BTreeMap<String, String> {
        &self.help_texts
    }

    pub fn hooks(&self) -> &BTreeMap<String, Vec<PluginHook>> {
        &self.hooks
    }

    pub fn timers(&self) -> &[Timer] {
        &self.timers
    }

    pub(crate) fn timer_mut(&mut self, name: &str) -> Option<&mut Timer> {
        self.timers.iter_mut().find(|t| t.name == name)
    }

    pub fn summary(&self) -> PluginSummary {
        PluginSummary {
            name: self.name.clone(),
            category: self.category.clone(),
            description: self.description.clone(),
            doc_url: self.doc_url.clone(),
            rooms: self.rooms.clone(),
            commands: self
                .commands
                .values()
                .map(|c| CommandSummary {
                    trigger: c.command.clone(),
                    help_text: c.help_text.clone(),
                    power_level: c.power_level,
                    rooms: c.room_id.clone(),
                })
                .collect(),
        }
    }

    // ---- registration ----

    /// Register a command. Duplicate triggers are rejected and the original kept.
    ///
    /// Triggers are stored lowercase, matching how typed commands are looked up.
    pub fn add_command(&mut self, mut command: PluginCommand) -> bool {
        command.command = command.command.to_lowercase();
        if self.commands.contains_key(&command.command) {
            error!("Error adding command {} - command already exists", command.command);
            return false;
        }

        if let Some(rooms) = &command.room_id {
            merge_rooms(&mut self.rooms, rooms);
        }
        debug!("Added command {} to rooms {:?}", command.command, command.room_id);

        let dynamic = command.command_type.is_dynamic();
        self.help_texts.insert(command.command.clone(), command.help_text.clone());
        self.commands.insert(command.command.clone(), command);

        if dynamic {
            self.save_state();
        }
        true
    }

    /// Remove a dynamic command
    pub fn del_command(&mut self, trigger: &str) -> bool {
        let trigger = trigger.to_lowercase();
        let trigger = trigger.as_str();
        let is_dynamic = match self.commands.get(trigger) {
            Some(command) => command.command_type.is_dynamic(),
            None => return false,
        };
        if !is_dynamic {
            warn!("Plugin {} tried to remove static command {}.", self.name, trigger);
            return false;
        }

        self.commands.remove(trigger);
        self.help_texts.remove(trigger);
        self.save_state();
        true
    }

    /// Register a hook, or extend the rooms of an existing hook for the same method
    pub fn add_hook(&mut self, hook: PluginHook) {
        if self.has_hook(&hook.event_type, &hook.method, hook.room_id_list.as_deref()) {
            return;
        }

        let event_type = hook.event_type.clone();
        let method = hook.method.clone();
        let rooms = hook.room_id_list.clone();
        let dynamic = hook.hook_type.is_dynamic();

        let hooks = self.hooks.entry(event_type.clone()).or_default();
        match hooks.iter_mut().find(|h| h.method == hook.method) {
            Some(existing) => {
                if let (Some(new_rooms), Some(stored)) = (&hook.room_id_list, existing.room_id_list.as_mut()) {
                    merge_rooms(stored, new_rooms);
                }
            }
            None => hooks.push(hook),
        }

        if dynamic {
            self.save_state();
        }
        debug!("Added hook for event {}, method {} to rooms {:?}", event_type, method, rooms);
    }

    /// Whether a hook for `method` covers every room in `rooms`
    pub fn has_hook(&self, event_type: &str, method: &str, rooms: Option<&[String]>) -> bool {
        let hook = match self
            .hooks
            .get(event_type)
            .and_then(|hooks| hooks.iter().find(|h| h.method == method))
        {
            Some(hook) => hook,
            None => return false,
        };

        match (&hook.room_id_list, rooms) {
            (None, _) => true,
            (Some(_), None) => true,
            (Some(stored), Some(wanted)) => wanted.iter().all(|r| stored.contains(r)),
        }
    }

    /// Remove a dynamic hook, or only the listed rooms from it.
    ///
    /// A hook valid for all rooms cannot be removed for specific rooms.
    pub fn del_hook(&mut self, event_type: &str, method: &str, rooms: Option<&[String]>) -> bool {
        if !self.has_hook(event_type, method, rooms) {
            return false;
        }

        let mut removed = false;
        let name = self.name.clone();
        if let Some(hooks) = self.hooks.get_mut(event_type) {
            let mut keep = Vec::with_capacity(hooks.len());
            for mut hook in hooks.drain(..) {
                if hook.method != method {
                    keep.push(hook);
                    continue;
                }
                if !hook.hook_type.is_dynamic() {
                    warn!("Plugin {} tried to remove static hook for {}.", name, event_type);
                    keep.push(hook);
                    continue;
                }

                let wanted = match rooms {
                    Some(wanted) => wanted,
                    None => {
                        removed = true;
                        continue;
                    }
                };
                if hook.room_id_list.is_none() {
                    error!(
                        "Plugin {} tried to remove a global hook for a specific room - this is not possible",
                        name
                    );
                    keep.push(hook);
                    continue;
                }

                removed = true;
                if let Some(stored) = hook.room_id_list.as_mut() {
                    if stored.iter().all(|r| wanted.contains(r)) {
                        continue;
                    }
                    stored.retain(|r| !wanted.contains(r));
                }
                keep.push(hook);
            }
            *hooks = keep;
        }
        self.hooks.retain(|_, hooks| !hooks.is_empty());

        if removed {
            self.save_state();
            debug!("Removed hook for event {}, method {}", event_type, method);
        }
        removed
    }

    pub fn add_timer(&mut self, method: &str, frequency: Option<Frequency>, timer_type: RegistrationType) {
        self.timers
            .push(Timer::new(&self.name, method, frequency).with_type(timer_type));
        if timer_type.is_dynamic() {
            self.save_state();
        }
    }

    pub fn has_timer_for_method(&self, method: &str) -> bool {
        self.timers.iter().any(|t| t.method == method)
    }

    /// Remove the first dynamic timer bound to `method`
    pub fn del_timer(&mut self, method: &str) -> bool {
        for (i, timer) in self.timers.iter().enumerate() {
            if timer.method != method {
                continue;
            }
            if timer.timer_type.is_dynamic() {
                self.timers.remove(i);
                self.save_state();
                return true;
            }
            warn!("Plugin {} tried to remove static timer {}.", self.name, timer.name);
        }
        false
    }

    // ---- configuration ----

    /// Declare a configuration item.
    ///
    /// The value comes from `P.yaml`, then `default`. A required item with
    /// neither makes the plugin unloadable. Returns `false` for duplicates.
    pub fn add_config(
        &mut self,
        key: &str,
        default: Option<serde_yaml::Value>,
        required: bool,
    ) -> Result<bool, PluginError> {
        if self.config_items.contains_key(key) {
            warn!(
                "{}: Configuration item {} has been defined already, new value not loaded.",
                self.name, key
            );
            return Ok(false);
        }

        let from_file = self
            .configuration
            .as_ref()
            .and_then(|c| c.get(&serde_yaml::Value::String(key.to_string())))
            .cloned();

        let value = match (from_file, default) {
            (Some(value), _) => {
                debug!("{}: add_config: Applying {} from config-file. Value: {:?}", self.name, key, value);
                Some(value)
            }
            (None, Some(default)) => {
                debug!("{}: add_config: {} not found, setting to default-value {:?}", self.name, key, default);
                Some(default)
            }
            (None, None) if !required => None,
            (None, None) => {
                let err = PluginError::MissingConfig {
                    plugin: self.name.clone(),
                    item: key.to_string(),
                };
                warn!("{}", err);
                return Err(err);
            }
        };

        self.config_items.insert(key.to_string(), value);
        Ok(true)
    }

    pub fn read_config(&self, key: &str) -> Option<serde_yaml::Value> {
        self.config_items.get(key).cloned().flatten()
    }

    pub fn read_config_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.read_config(key)?;
        match serde_yaml::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("{}: Configuration item {} has an unexpected type: {}", self.name, key, e);
                None
            }
        }
    }

    // ---- durable data ----

    /// Store `value` under `name`; unchanged values are not written again
    pub fn store_data<T: Serialize>(&mut self, name: &str, value: &T) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                error!("{}: Could not serialize data {}: {}", self.name, name, e);
                return false;
            }
        };

        if self.plugin_data.get(name).map(|e| &e.value) == Some(&value) {
            return true;
        }

        self.plugin_data
            .insert(name.to_string(), DataEntry::new(std::any::type_name::<T>(), value));
        self.save_data()
    }

    pub fn read_data<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let entry = self.plugin_data.get(name)?;
        match serde_json::from_value(entry.value.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("{}: Stored data {} ({}) could not be decoded: {}", self.name, name, entry.type_name, e);
                None
            }
        }
    }

    /// Remove `name`; `false` if it did not exist or could not be persisted
    pub fn clear_data(&mut self, name: &str) -> bool {
        if self.plugin_data.remove(name).is_none() {
            return false;
        }
        self.save_data()
    }

    /// Write a timestamped copy of the data. Call before destructive changes.
    pub fn backup_data(&self) -> bool {
        match self
            .store
            .backup_data(&self.plugin_data, Local::now().naive_local())
        {
            Ok(Some(path)) => {
                debug!("{}: Backup written to {}", self.name, path.display());
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!("{}: Backup failed: {}", self.name, e);
                false
            }
        }
    }

    fn save_data(&self) -> bool {
        match self.store.save_data(&self.plugin_data) {
            Ok(()) => true,
            Err(e) => {
                error!("Could not write plugin_data for {}: {}", self.name, e);
                false
            }
        }
    }

    pub fn load_data(&mut self) {
        self.plugin_data = self.store.load_data();
    }

    // ---- state ----

    pub fn state(&self) -> PluginState {
        let commands = self
            .commands
            .iter()
            .filter(|(_, c)| c.command_type.is_dynamic())
            .map(|(k, c)| (k.clone(), c.clone()))
            .collect();

        let mut hooks: BTreeMap<String, Vec<PluginHook>> = BTreeMap::new();
        for (event_type, list) in &self.hooks {
            let dynamic: Vec<PluginHook> = list
                .iter()
                .filter(|h| h.hook_type.is_dynamic())
                .cloned()
                .collect();
            if !dynamic.is_empty() {
                hooks.insert(event_type.clone(), dynamic);
            }
        }

        PluginState {
            commands,
            hooks,
            timers: self.timers.clone(),
        }
    }

    /// Persist dynamic registrations and timer executions
    pub fn save_state(&self) -> bool {
        let state = self.state();
        match self.store.save_state(&state, state.is_empty()) {
            Ok(()) => true,
            Err(e) => {
                error!("Could not write plugin_state for {}: {}", self.name, e);
                false
            }
        }
    }

    /// Merge the saved state into the live registries
    pub fn load_state(&mut self) {
        let state: PluginState = match self.store.load_state() {
            Some(state) => state,
            None => return,
        };
        self.apply_state(state);
    }

    fn apply_state(&mut self, state: PluginState) {
        for (trigger, mut command) in state.commands {
            let trigger = trigger.to_lowercase();
            command.command = trigger.clone();
            if let Some(rooms) = &command.room_id {
                merge_rooms(&mut self.rooms, rooms);
            }
            self.help_texts.insert(trigger.clone(), command.help_text.clone());
            self.commands.insert(trigger, command);
        }

        for (event_type, restored) in state.hooks {
            let hooks = self.hooks.entry(event_type).or_default();
            for hook in restored {
                if hooks.iter().any(|h| h.method == hook.method) {
                    debug!("{}: Hook {} already registered, not restoring it", self.name, hook.method);
                    continue;
                }
                hooks.push(hook);
            }
        }

        for saved in state.timers {
            match self.timers.iter_mut().find(|t| t.name == saved.name) {
                Some(live) => live.last_execution = saved.last_execution,
                None if saved.timer_type.is_dynamic() => self.timers.push(saved),
                None => {}
            }
        }
    }

    // ---- client ----

    pub fn set_client(&mut self, client: Arc<dyn ChatClient>) {
        self.client = Some(client);
    }

    pub fn get_client(&self) -> Result<Arc<dyn ChatClient>, PluginError> {
        self.client
            .clone()
            .ok_or_else(|| PluginError::NoClient(self.name.clone()))
    }

    // ---- chat output ----

    pub async fn send_message(
        &self,
        client: &dyn ChatClient,
        room_id: &str,
        message: &str,
        options: &SendOptions,
    ) -> Option<String> {
        self.send(client, room_id, message, options, false).await
    }

    pub async fn respond_message(&self, command: &Command, message: &str, options: &SendOptions) -> Option<String> {
        self.send(command.client.as_ref(), command.room_id(), message, options, false)
            .await
    }

    pub async fn send_notice(
        &self,
        client: &dyn ChatClient,
        room_id: &str,
        message: &str,
        options: &SendOptions,
    ) -> Option<String> {
        self.send(client, room_id, message, options, true).await
    }

    pub async fn respond_notice(&self, command: &Command, message: &str, options: &SendOptions) -> Option<String> {
        self.send(command.client.as_ref(), command.room_id(), message, options, true)
            .await
    }

    async fn send(
        &self,
        client: &dyn ChatClient,
        room_id: &str,
        message: &str,
        options: &SendOptions,
        notice: bool,
    ) -> Option<String> {
        chat::typing_delay(client, room_id, options.delay_ms).await;

        let message = match &options.expanded {
            Some(expanded) if !expanded.is_empty() => chat::expandable_message_body(message, expanded),
            _ => message.to_string(),
        };
        chat::send_text_to_room(client, room_id, &message, notice, options.markdown).await
    }

    pub async fn send_reaction(
        &self,
        client: &dyn ChatClient,
        room_id: &str,
        event_id: &str,
        reaction: &str,
    ) -> Option<String> {
        chat::send_reaction(client, room_id, event_id, reaction).await
    }

    /// Edit a message; nothing is sent if the content would not change
    pub async fn replace_message(
        &self,
        client: &dyn ChatClient,
        room_id: &str,
        event_id: &str,
        message: &str,
        expanded: Option<&str>,
    ) -> Option<String> {
        let message = with_expanded(message, expanded);
        chat::send_replace(client, room_id, event_id, &message, "m.text").await
    }

    pub async fn replace_notice(
        &self,
        client: &dyn ChatClient,
        room_id: &str,
        event_id: &str,
        message: &str,
        expanded: Option<&str>,
    ) -> Option<String> {
        let message = with_expanded(message, expanded);
        chat::send_replace(client, room_id, event_id, &message, "m.notice").await
    }

    pub async fn redact_message(
        &self,
        client: &dyn ChatClient,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
    ) -> Option<String> {
        chat::redact(client, room_id, event_id, reason).await
    }

    pub async fn send_image(&self, client: &dyn ChatClient, room_id: &str, image: &DynamicImage) -> Option<String> {
        chat::send_image(client, room_id, image).await
    }

    pub async fn fetch_image_from_url(&self, url: &str) -> Option<DynamicImage> {
        chat::fetch_image_from_url(url).await
    }

    // ---- members ----

    pub async fn is_user_in_room(
        &self,
        client: &dyn ChatClient,
        room_id: &str,
        display_name: &str,
        strictness: Strictness,
        fuzziness: u8,
    ) -> Option<RoomMember> {
        members::is_user_in_room(client, room_id, display_name, strictness, fuzziness).await
    }

    pub async fn is_user_id_in_room(&self, client: &dyn ChatClient, room_id: &str, user_id: &str) -> Option<RoomMember> {
        members::is_user_id_in_room(client, room_id, user_id).await
    }

    pub async fn link_user(
        &self,
        client: &dyn ChatClient,
        room_id: &str,
        display_name: &str,
        strictness: Strictness,
        fuzziness: u8,
    ) -> String {
        members::link_user(client, room_id, display_name, strictness, fuzziness).await
    }

    pub async fn link_user_by_id(&self, client: &dyn ChatClient, room_id: &str, user_id: &str) -> String {
        members::link_user_by_id(client, room_id, user_id).await
    }

    pub async fn get_mx_user_id(
        &self,
        client: &dyn ChatClient,
        room_id: &str,
        display_name: &str,
        strictness: Strictness,
        fuzziness: u8,
    ) -> Option<String> {
        members::get_mx_user_id(client, room_id, display_name, strictness, fuzziness).await
    }

    pub fn get_rooms_for_server(&self, client: &dyn ChatClient, server: &str) -> Vec<String> {
        members::get_rooms_for_server(client, server)
    }

    pub fn get_connected_servers(&self, client: &dyn ChatClient, rooms: Option<&[String]>) -> Vec<String> {
        members::get_connected_servers(client, rooms)
    }

    pub fn get_users_on_servers(
        &self,
        client: &dyn ChatClient,
        servers: &[String],
        rooms: Option<&[String]>,
    ) -> BTreeMap<String, Vec<String>> {
        members::get_users_on_servers(client, servers, rooms)
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("timers", &self.timers.len())
            .finish()
    }
}

fn merge_rooms(target: &mut Vec<String>, rooms: &[String]) {
    for room in rooms {
        if !target.contains(room) {
            target.push(room.clone());
        }
    }
}

fn with_expanded(message: &str, expanded: Option<&str>) -> String {
    match expanded {
        Some(e) if !e.is_empty() => chat::expandable_message_body(message, e),
        _ => message.to_string(),
    }
}
