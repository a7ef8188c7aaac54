//! Domain entities - rooms, members, events and command invocations

pub mod command;
pub mod message;
pub mod room;

pub use command::{Command, CommandSummary, PluginSummary};
pub use message::{RoomEvent, SyncEvent};
pub use room::{PowerLevels, Room, RoomMember};
