use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// One invocation of `!audio`: where to play and what to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    /// Guild ("room") the voice channel belongs to.
    pub guild_id: u64,
    /// Voice channel to join.
    pub channel_id: u64,
    pub file: PathBuf,
}

impl PlaybackRequest {
    pub fn new(guild_id: u64, channel_id: u64, file: impl Into<PathBuf>) -> Self {
        Self {
            guild_id,
            channel_id,
            file: file.into(),
        }
    }
}

/// Encoder configuration, fixed for the lifetime of a playback.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOptions {
    /// Emit bare frames. When false each frame carries a little-endian u16 length prefix.
    pub raw_output_framing: bool,
    /// Target Opus bitrate applied by the voice driver.
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u32,
    pub frame_duration: Duration,
    /// Frames the encoder may run ahead of the sender.
    pub buffered_frames: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            raw_output_framing: true,
            bitrate_kbps: 120,
            sample_rate: 48_000,
            channels: 2,
            frame_duration: Duration::from_millis(20),
            buffered_frames: 50,
        }
    }
}

impl EncodeOptions {
    /// Samples per channel in one frame.
    pub fn samples_per_frame(&self) -> usize {
        (self.sample_rate as u128 * self.frame_duration.as_micros() / 1_000_000) as usize
    }

    /// Payload size of one interleaved f32 frame.
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() * self.channels as usize * std::mem::size_of::<f32>()
    }
}

/// Snapshot of the encoder's cumulative progress.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EncodeStats {
    /// Audio time transcoded so far.
    pub duration: Duration,
    pub size_bytes: u64,
    /// Instantaneous output bitrate in kB/s.
    pub bitrate_kbs: f32,
    /// Encode speed relative to real time.
    pub speed: f32,
}

impl EncodeStats {
    pub fn size_kb(&self) -> u64 {
        self.size_bytes / 1024
    }
}

/// Lifecycle of one playback attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    Idle,
    Joining,
    Streaming,
    Draining,
    Closed,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Joining => "joining",
            PlaybackState::Streaming => "streaming",
            PlaybackState::Draining => "draining",
            PlaybackState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Successful terminal outcome of a playback. Faults are returned as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The source was played to its end.
    Finished,
    /// An external stop ended the playback early.
    Stopped,
}

/// Result of routing a stop request to the active playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Delivered,
    /// Nothing was streaming; the request was dropped.
    NoActivePlayback,
}
