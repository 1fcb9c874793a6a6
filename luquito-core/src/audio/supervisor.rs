//! src/audio/supervisor.rs
//!
//! Drives one playback attempt through
//! `Idle -> Joining -> Streaming -> Draining -> Closed`.
//!
//! The supervisor is the only place that waits: its loop wakes on either the
//! monitor tick or the completion signal. Encoding and sending run on their own
//! tasks, so progress reporting never slows either of them down. Whatever ends
//! the attempt, the Draining step always cleans up the encoder, clears the
//! sending indicator and disconnects, in that order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use luquito_common::models::{EncodeOptions, PlaybackOutcome, PlaybackRequest, PlaybackState};
use luquito_common::traits::{VoiceConduit, VoiceConnector};

use crate::audio::active::ActivePlayback;
use crate::audio::encoder::{AudioEncoder, EncoderSession};
use crate::audio::progress::{ProgressSink, TracingProgressSink};
use crate::audio::stream::{completion_channel, PlaybackStream};
use crate::Error;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Period of the progress monitor.
    pub monitor_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(1),
        }
    }
}

pub struct PlaybackSupervisor {
    connector: Arc<dyn VoiceConnector>,
    encoder: Arc<dyn AudioEncoder>,
    options: EncodeOptions,
    config: SupervisorConfig,
    active: ActivePlayback,
    progress: Arc<dyn ProgressSink>,
    state_observer: Option<UnboundedSender<PlaybackState>>,
}

impl PlaybackSupervisor {
    pub fn new(connector: Arc<dyn VoiceConnector>, encoder: Arc<dyn AudioEncoder>) -> Self {
        Self {
            connector,
            encoder,
            options: EncodeOptions::default(),
            config: SupervisorConfig::default(),
            active: ActivePlayback::new(),
            progress: Arc::new(TracingProgressSink),
            state_observer: None,
        }
    }

    pub fn with_options(mut self, options: EncodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Receive every state the attempts of this supervisor enter, in order.
    pub fn with_state_observer(mut self, observer: UnboundedSender<PlaybackState>) -> Self {
        self.state_observer = Some(observer);
        self
    }

    /// Handle for routing stop requests to whichever attempt is streaming.
    pub fn active(&self) -> ActivePlayback {
        self.active.clone()
    }

    /// Play `request.file` into the requested voice channel and return once
    /// the attempt is closed.
    ///
    /// `Ok(Finished)` means the file played to its end and `Ok(Stopped)` that an
    /// external stop cut it short. Join, open and mid-stream failures are errors.
    pub async fn play(&self, request: &PlaybackRequest) -> Result<PlaybackOutcome, Error> {
        let slot = self.active.claim()?;
        let mut attempt = Attempt::new(slot.id(), self.state_observer.clone());

        attempt.enter(PlaybackState::Joining);
        let conduit = match self.connector.join(request.guild_id, request.channel_id).await {
            Ok(conduit) => conduit,
            Err(e) => {
                error!("Could not join voice channel {}: {e}", request.channel_id);
                attempt.enter(PlaybackState::Closed);
                return Err(e);
            }
        };

        let mut session = match self.encoder.open(&request.file, &self.options).await {
            Ok(session) => session,
            Err(e) => {
                error!("Could not create encode session for '{}': {e}", request.file.display());
                disconnect(conduit.as_ref()).await;
                attempt.enter(PlaybackState::Closed);
                return Err(e);
            }
        };

        let (done_tx, mut done_rx) = completion_channel();
        let mut stream = match PlaybackStream::start(&mut session, conduit.clone(), done_tx.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Could not start playback stream: {e}");
                teardown(&mut session, conduit.as_ref()).await;
                attempt.enter(PlaybackState::Closed);
                return Err(e);
            }
        };

        slot.arm(done_tx);
        attempt.enter(PlaybackState::Streaming);
        info!(
            "Playing '{}' in guild {} channel {}",
            request.file.display(),
            request.guild_id,
            request.channel_id
        );

        let period = self.config.monitor_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let terminal = loop {
            tokio::select! {
                biased;
                signal = done_rx.recv() => {
                    break signal.unwrap_or_else(|| {
                        Err(Error::StreamFault("playback ended without a completion signal".into()))
                    });
                }
                _ = ticker.tick() => {
                    self.progress.report(stream.playback_position(), &session.stats());
                }
            }
        };

        slot.disarm();
        attempt.enter(PlaybackState::Draining);
        stream.shutdown().await;
        let position = stream.playback_position();
        teardown(&mut session, conduit.as_ref()).await;
        drop(slot);
        attempt.enter(PlaybackState::Closed);

        match terminal {
            Ok(()) => {
                info!("Playback finished after {:.2}s", position.as_secs_f64());
                Ok(PlaybackOutcome::Finished)
            }
            Err(e) if e.is_stop() => {
                info!("Playback stopped on request after {:.2}s", position.as_secs_f64());
                Ok(PlaybackOutcome::Stopped)
            }
            Err(e) => {
                error!("Playback failed after {:.2}s: {e}", position.as_secs_f64());
                Err(e)
            }
        }
    }
}

/// Draining: encoder cleanup, then stop-sending, then disconnect.
async fn teardown(session: &mut EncoderSession, conduit: &dyn VoiceConduit) {
    session.cleanup();
    if let Err(e) = conduit.set_sending(false).await {
        warn!("Could not clear sending indicator: {e}");
    }
    disconnect(conduit).await;
}

async fn disconnect(conduit: &dyn VoiceConduit) {
    if let Err(e) = conduit.disconnect().await {
        warn!("Voice disconnect failed: {e}");
    }
}

/// Per-attempt state bookkeeping.
struct Attempt {
    id: u64,
    state: PlaybackState,
    observer: Option<UnboundedSender<PlaybackState>>,
}

impl Attempt {
    fn new(id: u64, observer: Option<UnboundedSender<PlaybackState>>) -> Self {
        Self {
            id,
            state: PlaybackState::Idle,
            observer,
        }
    }

    fn enter(&mut self, next: PlaybackState) {
        debug!("Playback #{}: {} -> {}", self.id, self.state, next);
        self.state = next;
        if let Some(observer) = &self.observer {
            let _ = observer.send(next);
        }
    }
}
