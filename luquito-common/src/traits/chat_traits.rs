use async_trait::async_trait;
use mockall::automock;

use crate::error::Error;
use crate::models::ChannelMessage;

/// The chat-side operations the command layer needs from the platform.
#[automock]
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// The bot's own user id, once the gateway knows it.
    fn current_user_id(&self) -> Option<u64>;

    async fn send_message(&self, channel_id: u64, text: &str, tts: bool) -> Result<(), Error>;

    /// Voice channel `user_id` is currently connected to in `guild_id`.
    async fn user_voice_channel(&self, guild_id: u64, user_id: u64) -> Result<Option<u64>, Error>;

    /// Most recent messages of a channel, newest first.
    async fn recent_messages(&self, channel_id: u64, limit: u16) -> Result<Vec<ChannelMessage>, Error>;

    async fn delete_messages(&self, channel_id: u64, message_ids: &[u64]) -> Result<(), Error>;

    /// Show "Playing <game>" as the bot's presence.
    async fn set_game(&self, game: &str) -> Result<(), Error>;
}
