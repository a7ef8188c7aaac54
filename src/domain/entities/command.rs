use std::fmt;
use std::sync::Arc;

use super::{Room, RoomEvent};
use crate::application::messaging::parser::parse_args;
use crate::domain::traits::ChatClient;

/// A command as listed by help output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSummary {
    pub trigger: String,
    pub help_text: String,
    pub power_level: i64,
    pub rooms: Option<Vec<String>>,
}

impl CommandSummary {
    pub fn is_valid_for_room(&self, room_id: &str) -> bool {
        match &self.rooms {
            None => true,
            Some(rooms) => rooms.iter().any(|r| r == room_id),
        }
    }
}

/// Read-only description of a loaded plugin, handed to commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSummary {
    pub name: String,
    pub category: String,
    pub description: String,
    pub doc_url: Option<String>,
    pub rooms: Vec<String>,
    /// Sorted by trigger
    pub commands: Vec<CommandSummary>,
}

impl PluginSummary {
    pub fn is_valid_for_room(&self, room_id: &str) -> bool {
        self.rooms.is_empty() || self.rooms.iter().any(|r| r == room_id)
    }
}

/// A command issued by a user, already stripped of the command prefix
#[derive(Clone)]
pub struct Command {
    pub client: Arc<dyn ChatClient>,
    /// The command and its arguments, e.g. `echo hello world`
    pub command: String,
    pub args: Vec<String>,
    pub room: Room,
    pub event: RoomEvent,
    pub plugins: Arc<Vec<PluginSummary>>,
}

impl Command {
    pub fn new(client: Arc<dyn ChatClient>, command: impl Into<String>, room: Room, event: RoomEvent) -> Self {
        let command = command.into();
        let args = parse_args(&command);
        Self {
            client,
            command,
            args,
            room,
            event,
            plugins: Arc::new(Vec::new()),
        }
    }

    pub fn with_plugins(mut self, plugins: Arc<Vec<PluginSummary>>) -> Self {
        self.plugins = plugins;
        self
    }

    /// First whitespace-separated token, lowercased
    pub fn head(&self) -> String {
        self.command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }

    pub fn room_id(&self) -> &str {
        &self.room.room_id
    }

    pub fn sender(&self) -> &str {
        &self.event.sender
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("room", &self.room.room_id)
            .field("sender", &self.event.sender)
            .finish()
    }
}
