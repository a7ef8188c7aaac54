//! Commands and hooks a plugin registers

use serde::{Deserialize, Serialize};

/// Static registrations are recreated from code on every start, dynamic ones
/// are persisted in the plugin's state file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationType {
    #[default]
    Static,
    Dynamic,
}

impl RegistrationType {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, RegistrationType::Dynamic)
    }
}

/// A command trigger bound to a plugin method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginCommand {
    pub command: String,
    pub method: String,
    pub help_text: String,
    #[serde(default)]
    pub power_level: i64,
    /// `None`: valid in every room
    #[serde(default)]
    pub room_id: Option<Vec<String>>,
    #[serde(default)]
    pub command_type: RegistrationType,
}

impl PluginCommand {
    pub fn new(command: impl Into<String>, method: impl Into<String>, help_text: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            method: method.into(),
            help_text: help_text.into(),
            power_level: 0,
            room_id: None,
            command_type: RegistrationType::Static,
        }
    }

    pub fn with_power_level(mut self, level: i64) -> Self {
        self.power_level = level;
        self
    }

    pub fn with_rooms<I, S>(mut self, rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rooms: Vec<String> = rooms.into_iter().map(Into::into).collect();
        self.room_id = if rooms.is_empty() { None } else { Some(rooms) };
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.command_type = RegistrationType::Dynamic;
        self
    }

    pub fn is_valid_for_room(&self, room_id: &str) -> bool {
        match &self.room_id {
            None => true,
            Some(rooms) => rooms.iter().any(|r| r == room_id),
        }
    }
}

/// A subscription of a plugin method to an event type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginHook {
    pub event_type: String,
    pub method: String,
    /// `None`: matches every room
    #[serde(default)]
    pub room_id_list: Option<Vec<String>>,
    /// `None`: matches every event; otherwise only events relating to these
    #[serde(default)]
    pub event_ids: Option<Vec<String>>,
    #[serde(default)]
    pub hook_type: RegistrationType,
}

impl PluginHook {
    pub fn new(event_type: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            method: method.into(),
            room_id_list: None,
            event_ids: None,
            hook_type: RegistrationType::Static,
        }
    }

    pub fn with_rooms<I, S>(mut self, rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rooms: Vec<String> = rooms.into_iter().map(Into::into).collect();
        self.room_id_list = if rooms.is_empty() { None } else { Some(rooms) };
        self
    }

    pub fn with_event_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        self.event_ids = if ids.is_empty() { None } else { Some(ids) };
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.hook_type = RegistrationType::Dynamic;
        self
    }

    pub fn matches_room(&self, room_id: &str) -> bool {
        match &self.room_id_list {
            None => true,
            Some(rooms) => rooms.iter().any(|r| r == room_id),
        }
    }

    /// An event matches when no filter is set or it relates to a listed event
    pub fn matches_event(&self, relates_to: Option<&str>) -> bool {
        match (&self.event_ids, relates_to) {
            (None, _) => true,
            (Some(ids), Some(id)) => ids.iter().any(|e| e == id),
            (Some(_), None) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_room_list_means_everywhere() {
        let cmd = PluginCommand::new("echo", "echo", "").with_rooms(Vec::<String>::new());
        assert_eq!(cmd.room_id, None);
        assert!(cmd.is_valid_for_room("!any:h"));
    }

    #[test]
    fn scoped_command_only_in_listed_rooms() {
        let cmd = PluginCommand::new("admin", "admin", "").with_rooms(["!a:h"]);
        assert!(cmd.is_valid_for_room("!a:h"));
        assert!(!cmd.is_valid_for_room("!b:h"));
    }

    #[test]
    fn event_filter_requires_relation() {
        let hook = PluginHook::new("m.reaction", "on_reaction").with_event_ids(["$poll"]);
        assert!(hook.matches_event(Some("$poll")));
        assert!(!hook.matches_event(Some("$other")));
        assert!(!hook.matches_event(None));
        assert!(PluginHook::new("m.reaction", "x").matches_event(None));
    }

    #[test]
    fn registration_type_serializes_lowercase() {
        let json = serde_json::to_string(&RegistrationType::Dynamic).unwrap();
        assert_eq!(json, "\"dynamic\"");
    }
}
