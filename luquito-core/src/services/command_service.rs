use std::sync::Arc;

use tracing::{debug, warn};

use luquito_common::models::IncomingMessage;
use luquito_common::traits::ChatGateway;

use crate::audio::PlaybackSupervisor;
use crate::config::AudioLibrary;
use crate::services::builtin_commands::handle_builtin_command;
use crate::Error;

/// Command keywords the bot answers to. `!clear` also removes messages that start with any of them.
pub const COMMAND_PREFIXES: [&str; 5] = ["!audio", "!stop", "!clear", "!frase", "!jogo"];

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// `!audio <keyword>`
    Audio(Option<String>),
    Stop,
    Clear,
    /// `!frase`, or `!frasetts` for a text-to-speech reply.
    Phrase { tts: bool },
    Game,
}

impl ChatCommand {
    /// Parse the first whitespace-separated word of `text` as a command.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let command = match parts.next()? {
            "!audio" => ChatCommand::Audio(parts.next().map(str::to_string)),
            "!stop" => ChatCommand::Stop,
            "!clear" => ChatCommand::Clear,
            "!frase" => ChatCommand::Phrase { tts: false },
            "!frasetts" => ChatCommand::Phrase { tts: true },
            "!jogo" => ChatCommand::Game,
            _ => return None,
        };
        Some(command)
    }
}

/// Text the bot answers a command with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub text: String,
    pub tts: bool,
}

impl CommandReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tts: false,
        }
    }

    pub fn tts(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tts: true,
        }
    }
}

/// Context passed to built-in command handlers.
pub struct CommandContext<'a> {
    pub message: &'a IncomingMessage,
    pub gateway: &'a dyn ChatGateway,
    pub library: &'a AudioLibrary,
    pub supervisor: &'a PlaybackSupervisor,
}

pub struct CommandService {
    gateway: Arc<dyn ChatGateway>,
    library: Arc<AudioLibrary>,
    supervisor: Arc<PlaybackSupervisor>,
}

impl CommandService {
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        library: Arc<AudioLibrary>,
        supervisor: Arc<PlaybackSupervisor>,
    ) -> Self {
        debug!("Initializing CommandService with {} audio keywords", library.len());
        Self {
            gateway,
            library,
            supervisor,
        }
    }

    pub fn supervisor(&self) -> &Arc<PlaybackSupervisor> {
        &self.supervisor
    }

    /// Handle one inbound chat message. Returns once the command is done,
    /// which for `!audio` means once the playback has closed.
    pub async fn handle_message(&self, message: &IncomingMessage) -> Result<(), Error> {
        if self.gateway.current_user_id() == Some(message.author_id) {
            return Ok(());
        }
        let Some(command) = ChatCommand::parse(&message.content) else {
            return Ok(());
        };
        debug!("Command {command:?} from {} in {}", message.author_id, message.channel_id);

        let ctx = CommandContext {
            message,
            gateway: self.gateway.as_ref(),
            library: &self.library,
            supervisor: &self.supervisor,
        };

        if let Some(reply) = handle_builtin_command(&command, &ctx).await? {
            if let Err(e) = self
                .gateway
                .send_message(message.channel_id, &reply.text, reply.tts)
                .await
            {
                warn!("Could not send reply to {}: {e}", message.channel_id);
                return Err(e);
            }
        }
        Ok(())
    }
}
