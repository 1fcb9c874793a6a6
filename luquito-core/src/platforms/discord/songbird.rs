//! songbird.rs
//!
//! Voice conduits on top of Songbird. Songbird owns the voice gateway, the UDP
//! transport and Opus encoding; we hand it our PCM frames through a raw-PCM
//! track whose reader pulls from a bounded channel.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use songbird::driver::Bitrate;
use songbird::input::{Input, RawAdapter};
use songbird::tracks::TrackHandle;
use songbird::{Call, Songbird};
use symphonia_core::io::MediaSource;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use twilight_model::id::Id;
use twilight_model::id::marker::{ChannelMarker, GuildMarker};

use luquito_common::traits::{VoiceConduit, VoiceConnector};

use crate::Error;

/// Frames queued between the send loop and Songbird's mixer. Playback
/// position leads the mixer by at most this many frames.
const FEED_CAPACITY: usize = 2;

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u32 = 2;

pub struct SongbirdConnector {
    songbird: Arc<Songbird>,
}

impl SongbirdConnector {
    pub fn new(songbird: Arc<Songbird>) -> Self {
        Self { songbird }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdConnector {
    async fn join(&self, guild_id: u64, channel_id: u64) -> Result<Arc<dyn VoiceConduit>, Error> {
        let guild = Id::<GuildMarker>::new_checked(guild_id)
            .ok_or_else(|| Error::Join(format!("invalid guild id {guild_id}")))?;
        let channel = Id::<ChannelMarker>::new_checked(channel_id)
            .ok_or_else(|| Error::Join(format!("invalid channel id {channel_id}")))?;

        info!("Joining voice channel {channel} in guild {guild}");
        let call = match self.songbird.join(guild, channel).await {
            Ok(call) => call,
            Err(e) => {
                // A failed join can leave a half-open call behind.
                let _ = self.songbird.remove(guild).await;
                return Err(Error::Join(e.to_string()));
            }
        };

        Ok(Arc::new(SongbirdConduit {
            songbird: self.songbird.clone(),
            guild,
            call,
            feed: Mutex::new(None),
            disconnected: AtomicBool::new(false),
        }))
    }
}

struct ActiveFeed {
    frames: mpsc::Sender<Bytes>,
    track: TrackHandle,
}

pub struct SongbirdConduit {
    songbird: Arc<Songbird>,
    guild: Id<GuildMarker>,
    call: Arc<Mutex<Call>>,
    feed: Mutex<Option<ActiveFeed>>,
    disconnected: AtomicBool,
}

impl SongbirdConduit {
    async fn close_feed(&self) {
        if let Some(feed) = self.feed.lock().await.take() {
            drop(feed.frames);
            if let Err(e) = feed.track.stop() {
                debug!("Track already finished: {e}");
            }
        }
    }
}

#[async_trait]
impl VoiceConduit for SongbirdConduit {
    async fn set_bitrate(&self, kbps: u32) -> Result<(), Error> {
        let bits = i32::try_from(kbps.saturating_mul(1000))
            .map_err(|_| Error::Platform(format!("bitrate {kbps} kbps out of range")))?;
        self.call.lock().await.set_bitrate(Bitrate::BitsPerSecond(bits));
        Ok(())
    }

    async fn set_sending(&self, sending: bool) -> Result<(), Error> {
        if !sending {
            self.close_feed().await;
            return Ok(());
        }

        let mut feed = self.feed.lock().await;
        if feed.is_some() {
            return Ok(());
        }
        if self.disconnected.load(Ordering::Acquire) {
            return Err(Error::Platform("voice connection already closed".into()));
        }

        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let source = PcmFeedSource::new(rx);
        let input: Input = RawAdapter::new(source, SAMPLE_RATE, CHANNELS).into();
        let track = self.call.lock().await.play_input(input);
        *feed = Some(ActiveFeed { frames: tx, track });
        Ok(())
    }

    async fn send_frame(&self, frame: Bytes) -> Result<(), Error> {
        let frames = {
            let feed = self.feed.lock().await;
            match feed.as_ref() {
                Some(feed) => feed.frames.clone(),
                None => return Err(Error::Platform("send_frame called while not sending".into())),
            }
        };
        frames
            .send(frame)
            .await
            .map_err(|_| Error::Platform("voice track stopped reading".into()))
    }

    async fn disconnect(&self) -> Result<(), Error> {
        if self.disconnected.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.close_feed().await;
        info!("Leaving voice in guild {}", self.guild);
        self.songbird
            .remove(self.guild)
            .await
            .map_err(|e| Error::Platform(format!("leaving voice: {e}")))
    }
}

/// Blocking `Read` over the frame channel, read by Songbird's mixer thread.
/// End of stream is reported once the sender side is dropped.
struct PcmFeedSource {
    frames: std::sync::Mutex<mpsc::Receiver<Bytes>>,
    current: Bytes,
}

impl PcmFeedSource {
    fn new(frames: mpsc::Receiver<Bytes>) -> Self {
        Self {
            frames: std::sync::Mutex::new(frames),
            current: Bytes::new(),
        }
    }
}

impl Read for PcmFeedSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.current.has_remaining() {
            let frames = self
                .frames
                .get_mut()
                .map_err(|_| io::Error::other("pcm feed poisoned"))?;
            match frames.blocking_recv() {
                Some(frame) => self.current = frame,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.remaining());
        self.current.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

impl Seek for PcmFeedSource {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "live pcm feed cannot seek"))
    }
}

impl MediaSource for PcmFeedSource {
    fn is_seekable(&self) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

impl Drop for PcmFeedSource {
    fn drop(&mut self) {
        if let Ok(frames) = self.frames.get_mut() {
            frames.close();
        }
        if self.current.has_remaining() {
            warn!("Voice track dropped with {} unplayed bytes", self.current.remaining());
        }
    }
}
