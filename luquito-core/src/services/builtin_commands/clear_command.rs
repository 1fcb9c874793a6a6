use tracing::info;

use luquito_common::models::ChannelMessage;

use crate::Error;
use crate::services::command_service::{CommandContext, CommandReply, COMMAND_PREFIXES};

/// How far back `!clear` looks.
pub const CLEAR_HISTORY_LIMIT: u16 = 100;

/// `!clear`: delete the bot's own messages and command invocations from the
/// channel's recent history.
pub async fn handle_clear(ctx: &CommandContext<'_>) -> Result<Option<CommandReply>, Error> {
    let channel_id = ctx.message.channel_id;
    let messages = ctx
        .gateway
        .recent_messages(channel_id, CLEAR_HISTORY_LIMIT)
        .await?;
    info!("Found {} messages", messages.len());

    let ids = select_clearable(&messages, ctx.gateway.current_user_id());
    info!("Attempting to delete {} messages", ids.len());
    if !ids.is_empty() {
        ctx.gateway.delete_messages(channel_id, &ids).await?;
    }
    Ok(None)
}

/// Ids of messages written by the bot or starting with a known command.
pub fn select_clearable(messages: &[ChannelMessage], bot_user_id: Option<u64>) -> Vec<u64> {
    messages
        .iter()
        .filter(|m| {
            bot_user_id == Some(m.author_id)
                || COMMAND_PREFIXES.iter().any(|prefix| m.content.starts_with(prefix))
        })
        .map(|m| m.id)
        .collect()
}
