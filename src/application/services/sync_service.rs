//! Sync service - logs in, then feeds sync responses to the dispatcher forever

use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::application::errors::{BotError, ClientError};
use crate::application::messaging::EventDispatcher;
use crate::domain::traits::ChatClient;

pub const LOGIN_ATTEMPTS: u32 = 3;
pub const RECONNECT_DELAY: Duration = Duration::from_secs(15);
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SyncService {
    client: Arc<dyn ChatClient>,
    dispatcher: EventDispatcher,
    password: String,
    device_name: String,
    retry_delay: Duration,
    sync_timeout: Duration,
}

impl SyncService {
    pub fn new(dispatcher: EventDispatcher, password: impl Into<String>, device_name: impl Into<String>) -> Self {
        Self {
            client: dispatcher.client(),
            dispatcher,
            password: password.into(),
            device_name: device_name.into(),
            retry_delay: RECONNECT_DELAY,
            sync_timeout: SYNC_TIMEOUT,
        }
    }

    /// Delay between login attempts and after connection errors
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Run until the client closes or login fails for good.
    ///
    /// The client is closed on every exit path.
    pub async fn run(&mut self) -> Result<(), BotError> {
        let result = self.run_inner().await;
        self.client.close().await;
        result
    }

    async fn run_inner(&mut self) -> Result<(), BotError> {
        self.login().await?;

        if self.client.should_upload_keys() {
            if let Err(e) = self.client.keys_upload().await {
                warn!("Key upload failed: {}", e);
            }
        }

        info!("Logged in as {}, starting sync loop", self.client.user_id());
        loop {
            match self.client.sync_once(self.sync_timeout).await {
                Ok(events) => {
                    for event in events {
                        debug!("Dispatching event for {}", event.room().room_id);
                        self.dispatcher.dispatch(event).await;
                    }
                    self.dispatcher
                        .on_sync_response(Local::now().naive_local())
                        .await;
                }
                Err(ClientError::Closed) => {
                    info!("Event source closed, stopping");
                    return Ok(());
                }
                Err(e) if e.is_connection_error() => {
                    warn!("Unable to connect to homeserver, retrying in {}s: {}", self.retry_delay.as_secs(), e);
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(ClientError::Http { status: 401, .. }) => {
                    error!("Access token was rejected by the homeserver");
                    return Err(BotError::Client(ClientError::Login("access token rejected".to_string())));
                }
                Err(e) => {
                    error!("Sync failed, retrying in {}s: {}", self.retry_delay.as_secs(), e);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn login(&mut self) -> Result<(), BotError> {
        for attempt in 1..=LOGIN_ATTEMPTS {
            match self.client.login(&self.password, &self.device_name).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!("Login attempt {} of {} failed: {}", attempt, LOGIN_ATTEMPTS, e);
                    if attempt < LOGIN_ATTEMPTS {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(BotError::LoginExhausted(LOGIN_ATTEMPTS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::ConsoleAdapter;
    use crate::infrastructure::config::BotConfig;
    use crate::plugins::PluginLoader;
    use tempfile::TempDir;

    fn service(adapter: Arc<ConsoleAdapter>, dir: &TempDir) -> SyncService {
        let client: Arc<dyn ChatClient> = adapter;
        let loader = PluginLoader::from_modules(dir.path(), Vec::new(), client.clone());
        let dispatcher = EventDispatcher::new(client, BotConfig::default(), loader);
        SyncService::new(dispatcher, "secret", "test")
            .with_retry_delay(Duration::from_millis(1))
            .with_sync_timeout(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn login_gives_up_after_three_attempts() {
        let dir = TempDir::new().unwrap();
        let adapter = Arc::new(ConsoleAdapter::new("@bot:h"));
        adapter.fail_next_logins(3);

        let result = service(adapter.clone(), &dir).run().await;
        assert!(matches!(result, Err(BotError::LoginExhausted(3))));
        assert!(adapter.is_closed());
    }

    #[tokio::test]
    async fn login_retries_then_syncs_until_closed() {
        let dir = TempDir::new().unwrap();
        let adapter = Arc::new(ConsoleAdapter::new("@bot:h"));
        adapter.fail_next_logins(2);
        adapter.add_room(crate::domain::entities::Room::new("!r:h").with_member("@a:h", None));
        adapter.push_message("!r:h", "@a:h", "hello").unwrap();
        adapter.close_inbound();

        let mut service = service(adapter.clone(), &dir);
        service.run().await.unwrap();
        assert!(adapter.is_logged_in());
        assert!(adapter.is_closed());
        assert_ne!(service.dispatcher().last_timer_tick(), chrono::NaiveDateTime::MIN);
    }
}
