//! plugbot - a chat bot whose features live in plugins
//!
//! The runtime discovers plugins, keeps their commands, hooks and timers in
//! registries, persists their data and state, and routes incoming chat events
//! to them.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod plugins;
