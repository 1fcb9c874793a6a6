//! gateway.rs
//!
//! `ChatGateway` over the Twilight HTTP client, the in-memory cache and the
//! shard senders.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use twilight_cache_inmemory::InMemoryCache;
use twilight_gateway::MessageSender;
use twilight_http::Client as HttpClient;
use twilight_model::gateway::payload::outgoing::UpdatePresence;
use twilight_model::gateway::presence::{ActivityType, MinimalActivity, Status};
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker, MessageMarker, UserMarker};

use luquito_common::models::ChannelMessage;
use luquito_common::traits::ChatGateway;

use crate::Error;

pub struct DiscordGateway {
    http: Arc<HttpClient>,
    cache: Arc<InMemoryCache>,
    shard_senders: Vec<MessageSender>,
    current_user_id: u64,
}

impl DiscordGateway {
    pub fn new(
        http: Arc<HttpClient>,
        cache: Arc<InMemoryCache>,
        shard_senders: Vec<MessageSender>,
        current_user_id: u64,
    ) -> Self {
        Self {
            http,
            cache,
            shard_senders,
            current_user_id,
        }
    }
}

fn channel_id(raw: u64) -> Result<Id<ChannelMarker>, Error> {
    Id::new_checked(raw).ok_or_else(|| Error::Platform(format!("Invalid channel ID: {raw}")))
}

#[async_trait]
impl ChatGateway for DiscordGateway {
    fn current_user_id(&self) -> Option<u64> {
        Some(self.current_user_id)
    }

    async fn send_message(&self, channel: u64, text: &str, tts: bool) -> Result<(), Error> {
        self.http
            .create_message(channel_id(channel)?)
            .content(text)
            .tts(tts)
            .await
            .map_err(|e| Error::Platform(format!("Error sending Discord message: {e:?}")))?;
        Ok(())
    }

    async fn user_voice_channel(&self, guild_id: u64, user_id: u64) -> Result<Option<u64>, Error> {
        let (Some(guild), Some(user)) = (
            Id::<GuildMarker>::new_checked(guild_id),
            Id::<UserMarker>::new_checked(user_id),
        ) else {
            return Ok(None);
        };
        Ok(self
            .cache
            .voice_state(user, guild)
            .map(|state| state.channel_id().get()))
    }

    async fn recent_messages(&self, channel: u64, limit: u16) -> Result<Vec<ChannelMessage>, Error> {
        let messages = self
            .http
            .channel_messages(channel_id(channel)?)
            .limit(limit)
            .await
            .map_err(|e| Error::Platform(format!("Error fetching messages: {e:?}")))?
            .models()
            .await
            .map_err(|e| Error::Platform(format!("Error parsing messages: {e:?}")))?;

        Ok(messages
            .into_iter()
            .map(|m| ChannelMessage {
                id: m.id.get(),
                author_id: m.author.id.get(),
                content: m.content,
            })
            .collect())
    }

    async fn delete_messages(&self, channel: u64, message_ids: &[u64]) -> Result<(), Error> {
        let channel = channel_id(channel)?;
        let ids: Vec<Id<MessageMarker>> = message_ids
            .iter()
            .filter_map(|id| Id::new_checked(*id))
            .collect();

        // The bulk endpoint only accepts two or more ids.
        match ids.as_slice() {
            [] => Ok(()),
            [single] => {
                self.http
                    .delete_message(channel, *single)
                    .await
                    .map_err(|e| Error::Platform(format!("Error deleting message: {e:?}")))?;
                Ok(())
            }
            many => {
                self.http
                    .delete_messages(channel, many)
                    .await
                    .map_err(|e| Error::Platform(format!("Error deleting messages: {e:?}")))?;
                Ok(())
            }
        }
    }

    async fn set_game(&self, game: &str) -> Result<(), Error> {
        let activity = MinimalActivity {
            kind: ActivityType::Playing,
            name: game.to_string(),
            url: None,
        };
        let presence = UpdatePresence::new(vec![activity.into()], false, None, Status::Online)
            .map_err(|e| Error::Platform(format!("Invalid presence: {e}")))?;

        for sender in &self.shard_senders {
            if let Err(e) = sender.command(&presence) {
                warn!("Could not update presence on a shard: {e}");
            }
        }
        debug!("Presence set to Playing {game}");
        Ok(())
    }
}
