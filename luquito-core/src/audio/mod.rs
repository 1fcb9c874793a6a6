//! Voice playback engine: encoder sessions, the send loop, and the supervisor
//! that ties one playback attempt together.

pub mod active;
pub mod encoder;
pub mod ffmpeg;
pub mod progress;
pub mod stream;
pub mod supervisor;

pub use active::{ActivePlayback, PlaybackSlot};
pub use encoder::{AudioEncoder, EncoderSession, FrameReceiver, FrameSink};
pub use ffmpeg::FfmpegEncoder;
pub use progress::{format_progress_line, ProgressSink, TracingProgressSink};
pub use stream::{completion_channel, CompletionReceiver, CompletionSender, PlaybackStream};
pub use supervisor::{PlaybackSupervisor, SupervisorConfig};
