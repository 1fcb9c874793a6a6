use tracing::{debug, info};

use luquito_common::models::{PlaybackOutcome, PlaybackRequest, StopOutcome};

use crate::Error;
use crate::services::command_service::{CommandContext, CommandReply};

/// `!audio <keyword>`: play the keyword's sound in the author's voice channel.
/// Blocks until the playback is closed.
pub async fn handle_audio(
    ctx: &CommandContext<'_>,
    keyword: Option<&str>,
) -> Result<Option<CommandReply>, Error> {
    let Some(keyword) = keyword else {
        debug!("!audio without a keyword");
        return Ok(None);
    };
    let Some(file) = ctx.library.get(keyword) else {
        debug!("Unknown audio keyword '{keyword}'");
        return Ok(None);
    };
    let Some(guild_id) = ctx.message.guild_id else {
        debug!("!audio outside a guild");
        return Ok(None);
    };
    let Some(channel_id) = ctx
        .gateway
        .user_voice_channel(guild_id, ctx.message.author_id)
        .await?
    else {
        debug!("User {} is not in a voice channel", ctx.message.author_id);
        return Ok(None);
    };

    let request = PlaybackRequest::new(guild_id, channel_id, file);
    match ctx.supervisor.play(&request).await {
        Ok(PlaybackOutcome::Finished) => Ok(None),
        Ok(PlaybackOutcome::Stopped) => {
            info!("'{keyword}' stopped before the end");
            Ok(None)
        }
        Err(Error::PlaybackBusy) => Ok(Some(CommandReply::text(
            "Already playing something. Use !stop first.",
        ))),
        Err(e) => Ok(Some(CommandReply::text(format!("Could not play sound: {e}")))),
    }
}

/// `!stop`: end the playback that is currently streaming.
pub fn handle_stop(ctx: &CommandContext<'_>) -> Option<CommandReply> {
    match ctx.supervisor.active().request_stop() {
        StopOutcome::Delivered => Some(CommandReply::text("Stopping.")),
        StopOutcome::NoActivePlayback => Some(CommandReply::text("Nothing is playing.")),
    }
}
