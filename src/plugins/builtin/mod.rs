//! Plugins compiled into the bot

pub mod echo;
pub mod help;

use std::sync::Arc;

use super::module::ModuleCatalogue;

pub use echo::EchoPlugin;
pub use help::HelpPlugin;

pub fn register_all(catalogue: &mut ModuleCatalogue) {
    catalogue.register("echo", || Arc::new(EchoPlugin));
    catalogue.register("help", || Arc::new(HelpPlugin));
}
