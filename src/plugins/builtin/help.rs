//! Help plugin - lists plugins and their commands for the current room

use async_trait::async_trait;

use crate::application::errors::PluginError;
use crate::domain::entities::{Command, PluginSummary};
use crate::plugins::module::{unknown_method, PluginModule};
use crate::plugins::plugin::{Plugin, SendOptions};
use crate::plugins::registration::PluginCommand;

pub struct HelpPlugin;

#[async_trait]
impl PluginModule for HelpPlugin {
    fn name(&self) -> &str {
        "help"
    }

    fn category(&self) -> &str {
        "General"
    }

    fn description(&self) -> &str {
        "Provide helpful help"
    }

    fn register(&self, plugin: &mut Plugin) -> Result<(), PluginError> {
        plugin.add_command(PluginCommand::new("help", "print_help", "Display list of all available commands"));
        Ok(())
    }

    async fn command(&self, method: &str, plugin: &mut Plugin, command: &Command) -> Result<(), PluginError> {
        if method != "print_help" {
            return Err(unknown_method(plugin, method));
        }
        let text = help_text(&command.plugins, command.room_id(), &command.args);
        plugin
            .respond_notice(command, &text, &SendOptions::default())
            .await;
        Ok(())
    }
}

/// Sorted `item: description` lines under a headline
fn sorted_listing(headline: &str, mut items: Vec<(String, String, i64)>) -> String {
    items.sort();
    let mut out = format!("{}  \n\n", headline);
    for (item, description, power_level) in items {
        if power_level != 0 {
            out.push_str(&format!("`{}`: {} (PL: {})  \n", item, description, power_level));
        } else {
            out.push_str(&format!("`{}`: {}  \n", item, description));
        }
    }
    out
}

pub fn help_text(plugins: &[PluginSummary], room_id: &str, args: &[String]) -> String {
    match args {
        [] => {
            let items = plugins
                .iter()
                .filter(|p| p.is_valid_for_room(room_id))
                .map(|p| (p.name.clone(), p.description.clone(), 0))
                .collect();
            sorted_listing(
                "**Available Plugins in this room**  \nuse `help <pluginname>` to get detailed help",
                items,
            )
        }
        [name] => {
            let plugin = match plugins
                .iter()
                .find(|p| &p.name == name && p.is_valid_for_room(room_id))
            {
                Some(p) => p,
                None => return "Plugin not active (in this room), try `help`".to_string(),
            };

            let (visible, hidden): (Vec<_>, Vec<_>) = plugin
                .commands
                .iter()
                .partition(|c| c.is_valid_for_room(room_id));
            let items = visible
                .into_iter()
                .map(|c| (c.trigger.clone(), c.help_text.clone(), c.power_level))
                .collect();

            let mut headline = format!("**Plugin {}**", plugin.name);
            if let Some(url) = &plugin.doc_url {
                headline.push_str(&format!(" ([Documentation]({}))", url));
            }
            let mut text = sorted_listing(&headline, items);
            if !hidden.is_empty() {
                text.push_str("\nNote: This plugin exposes additional commands which are restricted to other rooms.\n");
            }
            text
        }
        _ => "try `help` ;-)".to_string(),
    }
}
