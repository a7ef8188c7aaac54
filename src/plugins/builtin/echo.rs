//! Echo plugin - repeats what it was told

use async_trait::async_trait;

use crate::application::errors::PluginError;
use crate::domain::entities::Command;
use crate::plugins::module::{unknown_method, PluginModule};
use crate::plugins::plugin::{Plugin, SendOptions};
use crate::plugins::registration::PluginCommand;

pub struct EchoPlugin;

#[async_trait]
impl PluginModule for EchoPlugin {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "A very simple Echo plugin"
    }

    fn register(&self, plugin: &mut Plugin) -> Result<(), PluginError> {
        plugin.add_command(PluginCommand::new("echo", "echo", "make someone agree with you for once"));
        Ok(())
    }

    async fn command(&self, method: &str, plugin: &mut Plugin, command: &Command) -> Result<(), PluginError> {
        match method {
            "echo" => {
                let response = command.args.join(" ");
                plugin
                    .respond_message(command, &response, &SendOptions::default())
                    .await;
                Ok(())
            }
            _ => Err(unknown_method(plugin, method)),
        }
    }
}
