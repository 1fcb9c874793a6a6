//! src/audio/encoder.rs
//!
//! An `EncoderSession` owns one background transcoding task. The task pushes
//! frames into a bounded channel, so it can only run `buffered_frames` ahead of
//! whoever consumes them, and publishes its running statistics on a watch
//! channel that can be read at any time without blocking.

use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use luquito_common::error::EncodeError;
use luquito_common::models::{EncodeOptions, EncodeStats};

use crate::Error;

/// Produces encoder sessions for files. `FfmpegEncoder` is the production implementation.
#[async_trait]
pub trait AudioEncoder: Send + Sync {
    /// Start transcoding `file`. Fails with `EncodeError::OpenFailed` if the file
    /// is missing or cannot be decoded.
    async fn open(&self, file: &Path, options: &EncodeOptions) -> Result<EncoderSession, Error>;
}

type FrameResult = Result<Bytes, Error>;

/// Write side handed to the transcoding task.
pub struct FrameSink {
    frames: mpsc::Sender<FrameResult>,
    stats: watch::Sender<EncodeStats>,
    raw_output_framing: bool,
}

impl FrameSink {
    /// Queue one frame payload, waiting while the buffer is full.
    /// Returns false once the session has stopped listening.
    pub async fn push(&self, payload: Bytes) -> bool {
        let frame = if self.raw_output_framing {
            Ok(payload)
        } else {
            frame_with_length(&payload)
        };
        let fatal = frame.is_err();
        self.frames.send(frame).await.is_ok() && !fatal
    }

    /// Report a fault. The consumer sees it after any frames already queued.
    pub async fn fail(&self, err: Error) {
        let _ = self.frames.send(Err(err)).await;
    }

    pub fn update_stats(&self, apply: impl FnOnce(&mut EncodeStats)) {
        self.stats.send_modify(apply);
    }

    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }
}

/// Read side of the frame channel, claimed once by the playback stream.
pub struct FrameReceiver {
    frames: mpsc::Receiver<FrameResult>,
    raw_output_framing: bool,
}

impl FrameReceiver {
    /// Next ready-to-send payload. `None` is ordinary end-of-stream.
    pub async fn next_frame(&mut self) -> Option<FrameResult> {
        let item = self.frames.recv().await?;
        Some(item.and_then(|frame| {
            if self.raw_output_framing {
                Ok(frame)
            } else {
                payload_of(frame)
            }
        }))
    }
}

pub struct EncoderSession {
    options: EncodeOptions,
    frames: Option<FrameReceiver>,
    stats: watch::Receiver<EncodeStats>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl EncoderSession {
    /// Spawn `producer` as the session's transcoding task.
    ///
    /// The producer receives the frame sink and a token that is cancelled by
    /// `cleanup`; it should stop promptly once the token fires.
    pub fn spawn<F, Fut>(options: EncodeOptions, producer: F) -> Self
    where
        F: FnOnce(FrameSink, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (frames_tx, frames_rx) = mpsc::channel(options.buffered_frames.max(1));
        let (stats_tx, stats_rx) = watch::channel(EncodeStats::default());
        let cancel = CancellationToken::new();

        let sink = FrameSink {
            frames: frames_tx,
            stats: stats_tx,
            raw_output_framing: options.raw_output_framing,
        };
        let task = tokio::spawn(producer(sink, cancel.clone()));

        Self {
            frames: Some(FrameReceiver {
                frames: frames_rx,
                raw_output_framing: options.raw_output_framing,
            }),
            stats: stats_rx,
            cancel,
            task: Some(task),
            options,
        }
    }

    pub fn options(&self) -> &EncodeOptions {
        &self.options
    }

    /// Latest statistics snapshot.
    pub fn stats(&self) -> EncodeStats {
        *self.stats.borrow()
    }

    /// Hand the frame channel to a consumer. Only the first call gets it.
    pub fn take_frames(&mut self) -> Option<FrameReceiver> {
        self.frames.take()
    }

    /// Token that fires when the session is cleaned up.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.task.is_none()
    }

    /// Stop transcoding and release buffers. Safe to call more than once;
    /// returns true only for the call that actually released the session.
    pub fn cleanup(&mut self) -> bool {
        let Some(task) = self.task.take() else {
            return false;
        };
        self.cancel.cancel();
        task.abort();
        self.frames = None;
        debug!("Encoder session cleaned up");
        true
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        if self.cleanup() {
            trace!("Encoder session released on drop");
        }
    }
}

/// Reject options whose frames cannot carry a u16 length prefix.
pub fn check_framing(options: &EncodeOptions) -> Result<(), EncodeError> {
    if options.raw_output_framing || options.frame_bytes() <= usize::from(u16::MAX) {
        return Ok(());
    }
    Err(EncodeError::OpenFailed(format!(
        "{} byte frames do not fit a u16 length prefix",
        options.frame_bytes()
    )))
}

/// Prefix `payload` with its little-endian u16 length.
pub fn frame_with_length(payload: &[u8]) -> Result<Bytes, Error> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        Error::StreamFault(format!("{} byte frame does not fit a u16 length prefix", payload.len()))
    })?;
    let mut buf = BytesMut::with_capacity(payload.len() + 2);
    buf.put_u16_le(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Strip and check the length prefix written by `frame_with_length`.
pub fn payload_of(frame: Bytes) -> Result<Bytes, Error> {
    if frame.len() < 2 {
        return Err(Error::StreamFault(format!("truncated frame header ({} bytes)", frame.len())));
    }
    let declared = u16::from_le_bytes([frame[0], frame[1]]) as usize;
    let payload = frame.slice(2..);
    if payload.len() != declared {
        return Err(Error::StreamFault(format!(
            "frame length mismatch: header says {declared}, got {}",
            payload.len()
        )));
    }
    Ok(payload)
}
