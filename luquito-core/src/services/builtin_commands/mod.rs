// File: luquito-core/src/services/builtin_commands/mod.rs
//! Built-in chat commands. Each command lives in its own file; the
//! `CommandService` calls the single `handle_builtin_command` entry point.

pub mod audio_command;
pub mod clear_command;
pub mod phrase_command;

use crate::Error;
use crate::services::builtin_commands::{
    audio_command::{handle_audio, handle_stop},
    clear_command::handle_clear,
    phrase_command::{handle_game, handle_phrase},
};
use crate::services::command_service::{ChatCommand, CommandContext, CommandReply};

pub async fn handle_builtin_command(
    command: &ChatCommand,
    ctx: &CommandContext<'_>,
) -> Result<Option<CommandReply>, Error> {
    match command {
        ChatCommand::Audio(keyword) => handle_audio(ctx, keyword.as_deref()).await,
        ChatCommand::Stop => Ok(handle_stop(ctx)),
        ChatCommand::Clear => handle_clear(ctx).await,
        ChatCommand::Phrase { tts } => Ok(Some(handle_phrase(*tts))),
        ChatCommand::Game => handle_game(ctx).await,
    }
}
