// File: luquito-core/tests/test_utils/mod.rs
//
// Hand-written fakes for the voice and encoder seams. They count calls and
// write a shared journal so tests can check ordering across seams.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use luquito_common::error::EncodeError;
use luquito_common::models::{EncodeOptions, EncodeStats};
use luquito_common::traits::{VoiceConduit, VoiceConnector};
use luquito_core::audio::{AudioEncoder, EncoderSession, ProgressSink};
use luquito_core::Error;

#[derive(Default)]
pub struct Journal {
    events: Mutex<Vec<String>>,
    sessions: Mutex<Vec<CancellationToken>>,
}

impl Journal {
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions.lock().len()
    }

    /// True when every encoder session opened so far has been cleaned up.
    pub fn all_sessions_closed(&self) -> bool {
        self.sessions.lock().iter().all(|token| token.is_cancelled())
    }
}

pub struct FakeConduit {
    journal: Arc<Journal>,
    fail_after_frames: Option<usize>,
    pub frames: AtomicUsize,
    pub sending_off: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeConduit {
    pub fn frames_sent(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn sending_off_count(&self) -> usize {
        self.sending_off.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConduit for FakeConduit {
    async fn set_bitrate(&self, kbps: u32) -> Result<(), Error> {
        self.journal.record(format!("bitrate:{kbps}"));
        Ok(())
    }

    async fn set_sending(&self, sending: bool) -> Result<(), Error> {
        if sending {
            self.journal.record("sending:true");
        } else {
            self.sending_off.fetch_add(1, Ordering::SeqCst);
            self.journal.record(format!(
                "sending:false(encoder_closed={})",
                self.journal.all_sessions_closed()
            ));
        }
        Ok(())
    }

    async fn send_frame(&self, _frame: Bytes) -> Result<(), Error> {
        if let Some(limit) = self.fail_after_frames {
            if self.frames.load(Ordering::SeqCst) >= limit {
                return Err(Error::Platform("voice socket closed".into()));
            }
        }
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.journal.record("disconnect");
        Ok(())
    }
}

pub struct FakeConnector {
    journal: Arc<Journal>,
    conduit: Arc<FakeConduit>,
    fail_join: bool,
    pub joins: AtomicUsize,
}

impl FakeConnector {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self::build(journal, None, false)
    }

    /// Every `send_frame` after the first `frames` fails.
    pub fn failing_after(journal: Arc<Journal>, frames: usize) -> Self {
        Self::build(journal, Some(frames), false)
    }

    pub fn unreachable(journal: Arc<Journal>) -> Self {
        Self::build(journal, None, true)
    }

    fn build(journal: Arc<Journal>, fail_after_frames: Option<usize>, fail_join: bool) -> Self {
        let conduit = Arc::new(FakeConduit {
            journal: journal.clone(),
            fail_after_frames,
            frames: AtomicUsize::new(0),
            sending_off: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        });
        Self {
            journal,
            conduit,
            fail_join,
            joins: AtomicUsize::new(0),
        }
    }

    pub fn conduit(&self) -> Arc<FakeConduit> {
        self.conduit.clone()
    }

    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConnector for FakeConnector {
    async fn join(&self, guild_id: u64, channel_id: u64) -> Result<Arc<dyn VoiceConduit>, Error> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        if self.fail_join {
            self.journal.record("join-failed");
            return Err(Error::Join(format!("no route to channel {channel_id} in {guild_id}")));
        }
        self.journal.record("join");
        Ok(self.conduit.clone())
    }
}

/// Produces `frames` silent frames per known file, paced in real time.
pub struct FakeEncoder {
    journal: Arc<Journal>,
    files: HashMap<PathBuf, usize>,
}

impl FakeEncoder {
    pub fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            files: HashMap::new(),
        }
    }

    /// Register a file lasting `length`, in 20 ms frames.
    pub fn with_file(mut self, path: &str, length: Duration) -> Self {
        let frames = (length.as_millis() / 20) as usize;
        self.files.insert(PathBuf::from(path), frames);
        self
    }
}

#[async_trait]
impl AudioEncoder for FakeEncoder {
    async fn open(&self, file: &Path, options: &EncodeOptions) -> Result<EncoderSession, Error> {
        let Some(&frames) = self.files.get(file) else {
            return Err(EncodeError::OpenFailed(format!("{}: no such file", file.display())).into());
        };

        let frame_duration = options.frame_duration;
        let payload = Bytes::from(vec![0u8; options.frame_bytes()]);
        let session = EncoderSession::spawn(options.clone(), move |sink, cancel| async move {
            for i in 0..frames {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(frame_duration) => {}
                }
                if !sink.push(payload.clone()).await {
                    return;
                }
                let size = payload.len() as u64;
                sink.update_stats(|stats| {
                    stats.duration = frame_duration * (i as u32 + 1);
                    stats.size_bytes += size;
                    stats.bitrate_kbs = 384.0;
                    stats.speed = 1.0;
                });
            }
        });
        self.journal.sessions.lock().push(session.cancellation());
        Ok(session)
    }
}

/// Keeps every reported playback position.
#[derive(Default)]
pub struct RecordingProgress {
    positions: Mutex<Vec<Duration>>,
}

impl RecordingProgress {
    pub fn positions(&self) -> Vec<Duration> {
        self.positions.lock().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, position: Duration, _stats: &EncodeStats) {
        self.positions.lock().push(position);
    }
}
