//! Plugin runtime
//!
//! Plugins register commands, event hooks and timers. The loader owns every
//! plugin and routes incoming commands and events to them.

pub mod builtin;
pub mod loader;
pub mod members;
pub mod module;
pub mod plugin;
pub mod registration;
pub mod timer;

pub use loader::{CommandOutcome, PluginLoader};
pub use members::Strictness;
pub use module::{ModuleCatalogue, PluginModule};
pub use plugin::{Plugin, PluginState, SendOptions};
pub use registration::{PluginCommand, PluginHook, RegistrationType};
pub use timer::{Frequency, Timer};
