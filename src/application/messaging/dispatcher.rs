//! Event dispatcher - routes sync events to plugin commands and hooks

use chrono::NaiveDateTime;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::parser::MessageParser;
use crate::domain::entities::message::{EVENT_MESSAGE, EVENT_REACTION};
use crate::domain::entities::{Command, Room, RoomEvent, SyncEvent};
use crate::domain::traits::ChatClient;
use crate::infrastructure::config::BotConfig;
use crate::plugins::{CommandOutcome, PluginLoader};

/// Join attempts per invite before giving up
pub const JOIN_ATTEMPTS: u32 = 3;

/// A direct chat has the bot and one other member
pub const DIRECT_ROOM_MEMBERS: usize = 2;

/// Routes every sync event to the plugin loader.
///
/// Events are handled one at a time, so plugins never run concurrently.
pub struct EventDispatcher {
    client: Arc<dyn ChatClient>,
    parser: MessageParser,
    bot: BotConfig,
    loader: PluginLoader,
    last_timer_tick: NaiveDateTime,
}

impl EventDispatcher {
    pub fn new(client: Arc<dyn ChatClient>, bot: BotConfig, loader: PluginLoader) -> Self {
        Self {
            client,
            parser: MessageParser::new(bot.command_prefix.clone()),
            bot,
            loader,
            last_timer_tick: NaiveDateTime::MIN,
        }
    }

    pub fn loader(&self) -> &PluginLoader {
        &self.loader
    }

    pub fn loader_mut(&mut self) -> &mut PluginLoader {
        &mut self.loader
    }

    pub fn client(&self) -> Arc<dyn ChatClient> {
        self.client.clone()
    }

    pub fn last_timer_tick(&self) -> NaiveDateTime {
        self.last_timer_tick
    }

    pub async fn dispatch(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Message { room, event } => {
                self.on_message(&room, &event).await;
            }
            SyncEvent::Unknown { room, event } => self.on_unknown(&room, &event).await,
            SyncEvent::Invite {
                room,
                sender,
                is_direct,
            } => self.on_invite(&room, &sender, is_direct).await,
        }
    }

    /// Commands for every prefixed segment, otherwise message hooks
    pub async fn on_message(&mut self, room: &Room, event: &RoomEvent) -> Vec<CommandOutcome> {
        if event.sender == self.client.user_id() || !event.is_text_message() {
            return Vec::new();
        }
        let body = event.body().unwrap_or_default();
        debug!(
            "Bot message received for room {} | {}: {}",
            room.display_name(),
            room.user_name(&event.sender),
            body
        );

        let (has_commands, commands) = self.parser.commands(body);
        if !has_commands {
            self.loader
                .run_hooks(self.client.clone(), EVENT_MESSAGE, room, event)
                .await;
            return Vec::new();
        }

        let summaries = self.loader.summaries();
        let mut outcomes = Vec::with_capacity(commands.len());
        for text in commands {
            let command = Command::new(self.client.clone(), text, room.clone(), event.clone())
                .with_plugins(summaries.clone());
            let outcome = self.loader.run_command(&command).await;
            if outcome == CommandOutcome::NotFound {
                debug!("No plugin handled command {}", command.command);
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Reactions go to `m.reaction` hooks; other event types are ignored
    pub async fn on_unknown(&mut self, room: &Room, event: &RoomEvent) {
        if event.sender == self.client.user_id() {
            return;
        }
        if event.event_type == EVENT_REACTION {
            self.loader
                .run_hooks(self.client.clone(), EVENT_REACTION, room, event)
                .await;
        }
    }

    /// Join when no botmasters are set, the inviter is one, or the room is direct.
    ///
    /// After joining on behalf of anyone else the member list is fetched from
    /// the server; a room with more than two members is left and forgotten.
    pub async fn on_invite(&mut self, room: &Room, sender: &str, is_direct: bool) {
        debug!("Got invite to {} from {}.", room.room_id, sender);

        let trusted = self.bot.trusts_inviter(sender);
        if !trusted && !is_direct {
            info!("Ignoring invite to {} from {}", room.room_id, sender);
            return;
        }

        let mut joined = false;
        for attempt in 1..=JOIN_ATTEMPTS {
            match self.client.join(&room.room_id).await {
                Ok(()) => {
                    info!("Joined {}", room.room_id);
                    joined = true;
                    break;
                }
                Err(e) => error!("Error joining room {} (attempt {}): {}", room.room_id, attempt, e),
            }
        }
        if !joined {
            error!("Unable to join room: {}", room.room_id);
            return;
        }

        if trusted {
            return;
        }
        match self.client.joined_members(&room.room_id).await {
            Ok(members) if members.len() <= DIRECT_ROOM_MEMBERS => return,
            Ok(members) => warn!(
                "Unauthorized invite to {} by {}: room has {} members, leaving",
                room.room_id,
                sender,
                members.len()
            ),
            Err(e) => warn!(
                "Unauthorized invite to {} by {}: members could not be checked ({}), leaving",
                room.room_id, sender, e
            ),
        }

        if let Err(e) = self.client.leave(&room.room_id).await {
            error!("Error leaving room {}: {}", room.room_id, e);
            return;
        }
        if let Err(e) = self.client.forget(&room.room_id).await {
            warn!("Error forgetting room {}: {}", room.room_id, e);
        }
    }

    /// Post-sync callback: tick the timers
    pub async fn on_sync_response(&mut self, now: NaiveDateTime) {
        self.last_timer_tick = self
            .loader
            .run_timers(self.client.clone(), self.last_timer_tick, now)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::adapters::ConsoleAdapter;
    use tempfile::TempDir;

    fn setup(botmasters: Vec<String>) -> (TempDir, Arc<ConsoleAdapter>, EventDispatcher) {
        let dir = TempDir::new().unwrap();
        let adapter = Arc::new(ConsoleAdapter::new("@bot:h"));
        let client: Arc<dyn ChatClient> = adapter.clone();
        let loader = PluginLoader::from_modules(dir.path(), Vec::new(), client.clone());
        let bot = BotConfig {
            botmasters,
            ..BotConfig::default()
        };
        let dispatcher = EventDispatcher::new(client, bot, loader);
        (dir, adapter, dispatcher)
    }

    #[tokio::test]
    async fn own_messages_are_ignored() {
        let (_dir, _adapter, mut dispatcher) = setup(vec![]);
        let room = Room::new("!r:h");
        let outcomes = dispatcher
            .on_message(&room, &RoomEvent::text("$1", "@bot:h", "!echo hi"))
            .await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn unknown_commands_are_silent() {
        let (_dir, adapter, mut dispatcher) = setup(vec![]);
        let room = Room::new("!r:h");
        let outcomes = dispatcher
            .on_message(&room, &RoomEvent::text("$1", "@a:h", "!nothing\n\n!else"))
            .await;
        assert_eq!(outcomes, vec![CommandOutcome::NotFound, CommandOutcome::NotFound]);
        assert!(adapter.sent_events().is_empty());
    }

    #[tokio::test]
    async fn untrusted_non_direct_invite_is_ignored() {
        let (_dir, adapter, mut dispatcher) = setup(vec!["@alice:h".into()]);
        dispatcher.on_invite(&Room::new("!x:h"), "@bob:h", false).await;
        assert!(adapter.joined_rooms().is_empty());
    }

    #[tokio::test]
    async fn join_is_retried_three_times() {
        let (_dir, adapter, mut dispatcher) = setup(vec![]);
        adapter.fail_next_joins(2);
        dispatcher.on_invite(&Room::new("!x:h"), "@bob:h", false).await;
        assert_eq!(adapter.joined_rooms(), vec!["!x:h"]);

        adapter.fail_next_joins(3);
        dispatcher.on_invite(&Room::new("!y:h"), "@bob:h", false).await;
        assert_eq!(adapter.joined_rooms(), vec!["!x:h"]);
    }

    #[tokio::test]
    async fn direct_invite_into_real_direct_room_stays() {
        let (_dir, adapter, mut dispatcher) = setup(vec!["@alice:h".into()]);
        let room = Room::new("!dm:h").with_member("@bob:h", None);
        adapter.push_invite(room.clone(), "@bob:h", true);
        dispatcher.on_invite(&room, "@bob:h", true).await;
        assert_eq!(adapter.joined_rooms(), vec!["!dm:h"]);
        assert!(adapter.left_rooms().is_empty());
    }

    #[tokio::test]
    async fn first_tick_runs_and_updates_timestamp() {
        let (_dir, _adapter, mut dispatcher) = setup(vec![]);
        assert_eq!(dispatcher.last_timer_tick(), NaiveDateTime::MIN);
        let now = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        dispatcher.on_sync_response(now).await;
        assert_eq!(dispatcher.last_timer_tick(), now);
    }
}
