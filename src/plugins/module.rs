//! The trait plugin code implements, and the catalogue of known plugins

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::plugin::Plugin;
use crate::application::errors::PluginError;
use crate::domain::entities::{Command, Room, RoomEvent};
use crate::domain::traits::ChatClient;

/// Behaviour of a plugin.
///
/// `register` declares configuration, commands, hooks and timers against the
/// plugin's [`Plugin`] handle. Registered entries refer to methods by name;
/// the loader later calls back into `command`, `hook` or `timer` with that
/// name, so dynamic registrations restored from disk keep working.
#[async_trait]
pub trait PluginModule: Send + Sync {
    /// Unique identifier, also the on-disk name of the plugin
    fn name(&self) -> &str;

    fn category(&self) -> &str {
        "general"
    }

    fn description(&self) -> &str;

    fn register(&self, plugin: &mut Plugin) -> Result<(), PluginError>;

    async fn command(&self, method: &str, plugin: &mut Plugin, command: &Command) -> Result<(), PluginError> {
        let _ = command;
        Err(unknown_method(plugin, method))
    }

    async fn hook(
        &self,
        method: &str,
        plugin: &mut Plugin,
        client: Arc<dyn ChatClient>,
        room: &Room,
        event: &RoomEvent,
    ) -> Result<(), PluginError> {
        let _ = (client, room, event);
        Err(unknown_method(plugin, method))
    }

    async fn timer(&self, method: &str, plugin: &mut Plugin, client: Arc<dyn ChatClient>) -> Result<(), PluginError> {
        let _ = client;
        Err(unknown_method(plugin, method))
    }
}

pub fn unknown_method(plugin: &Plugin, method: &str) -> PluginError {
    PluginError::UnknownMethod {
        plugin: plugin.name.clone(),
        method: method.to_string(),
    }
}

type Constructor = Box<dyn Fn() -> Arc<dyn PluginModule> + Send + Sync>;

/// Plugins compiled into this binary, by name
#[derive(Default)]
pub struct ModuleCatalogue {
    constructors: BTreeMap<String, Constructor>,
}

impl ModuleCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalogue of the plugins shipped with the crate
    pub fn builtin() -> Self {
        let mut catalogue = Self::new();
        super::builtin::register_all(&mut catalogue);
        catalogue
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn PluginModule> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    pub fn instantiate(&self, name: &str) -> Option<Arc<dyn PluginModule>> {
        self.constructors.get(name).map(|make| make())
    }
}
