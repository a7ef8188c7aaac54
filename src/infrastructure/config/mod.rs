//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::application::errors::ConfigError;

/// Bot configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BotConfig {
    pub command_prefix: String,
    /// Users whose invites are always accepted. Empty: accept every invite.
    #[serde(default)]
    pub botmasters: Vec<String>,
}

impl BotConfig {
    pub fn is_botmaster(&self, user_id: &str) -> bool {
        self.botmasters.iter().any(|b| b == user_id)
    }

    /// Invites from this user are accepted into any room
    pub fn trusts_inviter(&self, user_id: &str) -> bool {
        self.botmasters.is_empty() || self.is_botmaster(user_id)
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            command_prefix: "!".to_string(),
            botmasters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct MatrixConfig {
    pub homeserver_url: String,
    pub user_id: String,
    #[serde(default)]
    pub user_password: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default)]
    pub enable_encryption: bool,
}

fn default_device_name() -> String {
    "plugbot".to_string()
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            homeserver_url: "https://matrix.example.org".to_string(),
            user_id: "@bot:example.org".to_string(),
            user_password: String::new(),
            device_id: None,
            device_name: default_device_name(),
            enable_encryption: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// SQLite file holding the client session
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("bot.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PluginsConfig {
    pub directory: PathBuf,
    #[serde(default)]
    pub allowlist: Vec<String>,
    #[serde(default)]
    pub denylist: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("plugins"),
            allowlist: Vec::new(),
            denylist: Vec::new(),
        }
    }
}

impl PluginsConfig {
    /// Denylist wins; a non-empty allowlist admits only the listed plugins
    pub fn is_allowed_plugin(&self, name: &str) -> bool {
        if self.denylist.iter().any(|p| p == name) {
            return false;
        }
        self.allowlist.is_empty() || self.allowlist.iter().any(|p| p == name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Parse(format!("Failed to read config {}: {}", path.display(), e)))?;

        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.command_prefix.is_empty() {
            return Err(ConfigError::MissingField("bot.command-prefix".to_string()));
        }
        if !self.matrix.user_id.starts_with('@') || !self.matrix.user_id.contains(':') {
            return Err(ConfigError::InvalidValue(format!(
                "matrix.user-id must look like @name:server, got {}",
                self.matrix.user_id
            )));
        }
        if !self.matrix.homeserver_url.starts_with("http://") && !self.matrix.homeserver_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(format!(
                "matrix.homeserver-url must be an http(s) url, got {}",
                self.matrix.homeserver_url
            )));
        }
        Ok(())
    }

    /// Override settings from the environment
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("MATRIX_HOMESERVER") {
            self.matrix.homeserver_url = url;
        }
        if let Ok(user) = std::env::var("MATRIX_USER_ID") {
            self.matrix.user_id = user;
        }
        if let Ok(password) = std::env::var("MATRIX_PASSWORD") {
            self.matrix.user_password = password;
        }
        if let Ok(prefix) = std::env::var("BOT_PREFIX") {
            self.bot.command_prefix = prefix;
        }
    }

    /// Default configuration as YAML, for `--init-config`
    pub fn default_yaml() -> Result<String, ConfigError> {
        serde_yaml::to_string(&Config::default())
            .map_err(|e| ConfigError::Parse(format!("Failed to serialize config: {}", e)))
    }
}
