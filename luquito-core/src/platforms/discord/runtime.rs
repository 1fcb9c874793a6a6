use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use songbird::Songbird;
use songbird::shards::TwilightMap;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use twilight_cache_inmemory::{InMemoryCache, ResourceType};
use twilight_gateway::{
    self as gateway,
    CloseFrame,
    Config,
    Event,
    EventTypeFlags,
    Intents,
    MessageSender,
    Shard,
    StreamExt,
};
use twilight_http::Client as HttpClient;
use twilight_http::client::ClientBuilder;
use twilight_model::gateway::payload::incoming::{MessageCreate, Ready as ReadyPayload};

use luquito_common::models::{EncodeOptions, IncomingMessage};

use crate::audio::{AudioEncoder, PlaybackSupervisor};
use crate::config::AudioLibrary;
use crate::platforms::ConnectionStatus;
use crate::platforms::discord::gateway::DiscordGateway;
use crate::platforms::discord::songbird::SongbirdConnector;
use crate::services::CommandService;
use crate::Error;

/// Reads one shard's events:
///   - updates the in-memory cache
///   - forwards voice gateway events to songbird
///   - hands chat messages to the command service on their own task, so a
///     `!stop` is handled while an `!audio` is still playing.
async fn shard_runner(
    mut shard: Shard,
    cache: Arc<InMemoryCache>,
    songbird: Arc<Songbird>,
    commands: Arc<CommandService>,
) {
    let shard_id = shard.id().number();
    info!("(ShardRunner) Shard {shard_id} started. Listening for events.");

    while let Some(item) = shard.next_event(EventTypeFlags::all()).await {
        let event = match item {
            Ok(event) => event,
            Err(err) => {
                error!("Shard {shard_id} => error receiving event: {err:?}");
                continue;
            }
        };

        cache.update(&event);
        songbird.process(&event).await;

        match &event {
            Event::Ready(ready) => {
                let data: &ReadyPayload = ready.as_ref();
                info!("Shard {shard_id} => READY as {} (ID={})", data.user.name, data.user.id);
            }
            Event::MessageCreate(msg_create) => {
                let msg: &MessageCreate = msg_create;
                if msg.author.bot {
                    debug!("Ignoring bot message from {}", msg.author.name);
                    continue;
                }
                let incoming = IncomingMessage {
                    guild_id: msg.guild_id.map(|g| g.get()),
                    channel_id: msg.channel_id.get(),
                    author_id: msg.author.id.get(),
                    content: msg.content.clone(),
                };
                let commands = commands.clone();
                tokio::spawn(async move {
                    if let Err(e) = commands.handle_message(&incoming).await {
                        warn!("Command in channel {} failed: {e}", incoming.channel_id);
                    }
                });
            }
            _ => {
                trace!("Shard {shard_id} => unhandled event: {:?}", event.kind());
            }
        }
    }

    warn!("(ShardRunner) Shard {shard_id} event loop ended.");
}

pub struct DiscordPlatform {
    pub token: String,
    pub connection_status: ConnectionStatus,

    library: Arc<AudioLibrary>,
    encoder: Arc<dyn AudioEncoder>,
    options: EncodeOptions,

    pub shard_tasks: Vec<JoinHandle<()>>,
    pub shard_senders: Vec<MessageSender>,

    pub http: Option<Arc<HttpClient>>,
    pub cache: Option<Arc<InMemoryCache>>,
    pub songbird: Option<Arc<Songbird>>,
    supervisor: Option<Arc<PlaybackSupervisor>>,
}

impl DiscordPlatform {
    pub fn new(token: String, library: Arc<AudioLibrary>, encoder: Arc<dyn AudioEncoder>) -> Self {
        Self {
            token,
            connection_status: ConnectionStatus::Disconnected,
            library,
            encoder,
            options: EncodeOptions::default(),
            shard_tasks: Vec::new(),
            shard_senders: Vec::new(),
            http: None,
            cache: None,
            songbird: None,
            supervisor: None,
        }
    }

    pub fn with_options(mut self, options: EncodeOptions) -> Self {
        self.options = options;
        self
    }

    /// The playback supervisor, once connected.
    pub fn supervisor(&self) -> Option<&Arc<PlaybackSupervisor>> {
        self.supervisor.as_ref()
    }

    pub async fn connect(&mut self) -> Result<(), Error> {
        if matches!(self.connection_status, ConnectionStatus::Connected) {
            info!("(DiscordPlatform) Already connected => skipping");
            return Ok(());
        }
        if self.token.is_empty() {
            return Err(Error::Config("Discord token is empty".into()));
        }

        let http_client = Arc::new(
            ClientBuilder::new()
                .token(self.token.clone())
                .timeout(Duration::from_secs(30))
                .build(),
        );
        self.http = Some(http_client.clone());

        let current_user = http_client
            .current_user()
            .await
            .map_err(|e| Error::Platform(format!("Fetching current user: {e}")))?
            .model()
            .await
            .map_err(|e| Error::Platform(format!("Parsing current user: {e}")))?;
        info!("(DiscordPlatform) Logged in as {} (ID={})", current_user.name, current_user.id);

        let cache = Arc::new(
            InMemoryCache::builder()
                .resource_types(ResourceType::GUILD | ResourceType::CHANNEL | ResourceType::VOICE_STATE)
                .build(),
        );
        self.cache = Some(cache.clone());

        let config = Config::new(
            self.token.clone(),
            Intents::GUILDS
                | Intents::GUILD_MESSAGES
                | Intents::MESSAGE_CONTENT
                | Intents::GUILD_VOICE_STATES,
        );

        let shards: Vec<Shard> = gateway::create_recommended(&http_client, config, |_, b| b.build())
            .await
            .map_err(|e| Error::Platform(format!("create_recommended error: {e}")))?
            .collect();

        let senders: HashMap<u32, MessageSender> = shards
            .iter()
            .map(|shard| (shard.id().number(), shard.sender()))
            .collect();
        self.shard_senders = senders.values().cloned().collect();

        let songbird = Arc::new(Songbird::twilight(Arc::new(TwilightMap::new(senders)), current_user.id));
        self.songbird = Some(songbird.clone());

        let supervisor = Arc::new(
            PlaybackSupervisor::new(Arc::new(SongbirdConnector::new(songbird.clone())), self.encoder.clone())
                .with_options(self.options.clone()),
        );
        self.supervisor = Some(supervisor.clone());

        let chat = Arc::new(DiscordGateway::new(
            http_client.clone(),
            cache.clone(),
            self.shard_senders.clone(),
            current_user.id.get(),
        ));
        let commands = Arc::new(CommandService::new(chat, self.library.clone(), supervisor));

        for shard in shards {
            let handle = tokio::spawn(shard_runner(
                shard,
                cache.clone(),
                songbird.clone(),
                commands.clone(),
            ));
            self.shard_tasks.push(handle);
        }

        self.connection_status = ConnectionStatus::Connected;
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), Error> {
        self.connection_status = ConnectionStatus::Disconnected;

        for sender in &self.shard_senders {
            let _ = sender.close(CloseFrame::NORMAL);
        }
        for task in self.shard_tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("(DiscordPlatform) Shard task ended abnormally: {e}");
            }
        }
        self.shard_senders.clear();
        Ok(())
    }
}
