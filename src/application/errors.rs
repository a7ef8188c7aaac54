//! Application layer errors

use thiserror::Error;

/// General bot errors
#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    #[error("Login failed after {0} attempts")]
    LoginExhausted(u32),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors reported by a chat client implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Login error: {0}")]
    Login(String),

    #[error("Server returned {status} {errcode}: {message}")]
    Http {
        status: u16,
        errcode: String,
        message: String,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The event source is gone; the sync loop ends
    #[error("Client closed")]
    Closed,
}

impl ClientError {
    /// Errors the sync loop recovers from by sleeping and reconnecting
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ClientError::Connection(_) | ClientError::Timeout)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_connect() || err.is_request() {
            ClientError::Connection(err.to_string())
        } else if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Connection(err.to_string())
        }
    }
}

/// Errors raised while loading or running plugin code
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Required configuration item {item} for plugin {plugin} could not be found")]
    MissingConfig { plugin: String, item: String },

    #[error("Plugin {plugin} has no method {method}")]
    UnknownMethod { plugin: String, method: String },

    #[error("Failed to load plugin: {0}")]
    Load(String),

    #[error("Plugin failed: {0}")]
    Failed(String),

    #[error("Plugin {0} has no client attached")]
    NoClient(String),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Legacy data error: {0}")]
    Legacy(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
