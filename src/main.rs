use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

use plugbot::application::errors::BotError;
use plugbot::application::messaging::EventDispatcher;
use plugbot::application::services::SyncService;
use plugbot::domain::traits::ChatClient;
use plugbot::infrastructure::adapters::console::{CONSOLE_ROOM, CONSOLE_USER};
use plugbot::infrastructure::adapters::{ConsoleAdapter, MatrixAdapter};
use plugbot::infrastructure::config::Config;
use plugbot::infrastructure::database::SessionStore;
use plugbot::plugins::{ModuleCatalogue, PluginLoader};

#[derive(Parser)]
#[command(name = "plugbot")]
#[command(version, about = "A chat bot driven by plugins", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(default_value = "config.yaml")]
    config: PathBuf,

    /// Plugins directory (overrides config)
    plugins_dir: Option<PathBuf>,

    /// Run against the console instead of a homeserver
    #[arg(long)]
    console: bool,

    /// Generate default config and plugin directories, then exit
    #[arg(long)]
    init_config: bool,
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.init_config {
        init_logging("info");
        let plugins_dir = cli.plugins_dir.unwrap_or_else(|| PathBuf::from("plugins"));
        return match init_config(&cli.config, &plugins_dir) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("{}", e);
                ExitCode::FAILURE
            }
        };
    }

    let loaded = if cli.console && !cli.config.exists() {
        Ok(Config::default())
    } else {
        Config::load(&cli.config)
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            tracing::error!("Failed to load config {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    config.apply_env();
    if let Some(dir) = cli.plugins_dir {
        config.plugins.directory = dir;
    }
    init_logging(&config.logging.level);

    match run_bot(config, cli.console).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_bot(config: Config, console: bool) -> Result<(), BotError> {
    tracing::info!("Starting plugbot v{} as {}", env!("CARGO_PKG_VERSION"), config.matrix.user_id);

    let client: Arc<dyn ChatClient> = if console {
        let adapter = Arc::new(ConsoleAdapter::interactive(config.matrix.user_id.clone()));
        spawn_console_reader(adapter.clone());
        adapter.close_inbound();
        adapter
    } else {
        let store = SessionStore::new(&config.storage.database)?;
        Arc::new(MatrixAdapter::new(&config.matrix, Some(store)))
    };

    let catalogue = ModuleCatalogue::builtin();
    let mut loader = PluginLoader::load(&config.plugins, &catalogue, client.clone());
    loader.load_plugin_data().await;
    loader.load_plugin_state().await;
    tracing::info!("Loaded {} plugins", loader.get_plugins().count());

    let dispatcher = EventDispatcher::new(client.clone(), config.bot.clone(), loader);
    let mut service = SyncService::new(
        dispatcher,
        config.matrix.user_password.clone(),
        config.matrix.device_name.clone(),
    );

    tokio::select! {
        result = service.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            client.close().await;
            Ok(())
        }
    }
}

/// Feed stdin lines into the console adapter as messages from the console user
fn spawn_console_reader(adapter: Arc<ConsoleAdapter>) {
    let sender = match adapter.inbound() {
        Some(sender) => sender,
        None => return,
    };
    println!("Console mode: messages go to {} as {}. Ctrl-D quits.", CONSOLE_ROOM, CONSOLE_USER);

    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            let event = match adapter.text_event(CONSOLE_ROOM, CONSOLE_USER, &line) {
                Some(event) => event,
                None => break,
            };
            if sender.send(event).is_err() {
                break;
            }
        }
    });
}

fn init_config(config_path: &Path, plugins_dir: &Path) -> Result<(), BotError> {
    if config_path.exists() {
        tracing::warn!("{} already exists, leaving it alone", config_path.display());
    } else {
        let yaml = Config::default_yaml()?;
        std::fs::write(config_path, yaml).map_err(|e| BotError::Internal(e.to_string()))?;
        println!("Created {}", config_path.display());
    }

    for name in ModuleCatalogue::builtin().names() {
        let dir = plugins_dir.join(name);
        std::fs::create_dir_all(&dir).map_err(|e| BotError::Internal(e.to_string()))?;
    }
    println!("Plugin directory {} is ready", plugins_dir.display());
    Ok(())
}
