//! src/audio/stream.rs
//!
//! The send loop: pulls frames from an encoder session and forwards them to a
//! voice conduit, advancing the playback position by one frame duration per
//! frame delivered. It is the only writer of the completion signal besides an
//! external stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use luquito_common::traits::VoiceConduit;

use crate::audio::encoder::{EncoderSession, FrameReceiver};
use crate::Error;

/// Write side of a playback attempt's completion channel.
///
/// The channel holds a single value. `signal` never blocks: once the terminal
/// outcome has been written, later writes are dropped.
#[derive(Clone)]
pub struct CompletionSender {
    tx: mpsc::Sender<Result<(), Error>>,
}

impl CompletionSender {
    /// Returns false if an outcome was already recorded or nobody is listening.
    pub fn signal(&self, outcome: Result<(), Error>) -> bool {
        match self.tx.try_send(outcome) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(late)) => {
                debug!("Completion already signalled; dropping late outcome {late:?}");
                false
            }
            Err(mpsc::error::TrySendError::Closed(late)) => {
                debug!("Completion receiver gone; dropping outcome {late:?}");
                false
            }
        }
    }
}

pub type CompletionReceiver = mpsc::Receiver<Result<(), Error>>;

pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (CompletionSender { tx }, rx)
}

pub struct PlaybackStream {
    position_us: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PlaybackStream {
    /// Claim the session's frames, mark the conduit as sending and start the send loop.
    pub async fn start(
        session: &mut EncoderSession,
        conduit: Arc<dyn VoiceConduit>,
        done: CompletionSender,
    ) -> Result<Self, Error> {
        let frames = session
            .take_frames()
            .ok_or_else(|| Error::StreamFault("encoder frames already claimed".into()))?;
        let frame_duration = session.options().frame_duration;

        conduit.set_bitrate(session.options().bitrate_kbps).await?;
        conduit.set_sending(true).await?;

        let position_us = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(send_loop(
            frames,
            conduit,
            frame_duration,
            position_us.clone(),
            cancel.clone(),
            done,
        ));

        Ok(Self {
            position_us,
            cancel,
            task: Some(task),
        })
    }

    /// Audio time the conduit has accepted so far. A frame counts once
    /// `send_frame` returns; conduits that queue ahead of the wire (songbird's
    /// feed holds two frames) lead actual transmission by at most that queue.
    pub fn playback_position(&self) -> Duration {
        Duration::from_micros(self.position_us.load(Ordering::Acquire))
    }

    /// Stop the send loop (if still running) and wait until it has released
    /// its frames and conduit handle.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Playback send loop ended abnormally: {e}");
            }
        }
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn send_loop(
    mut frames: FrameReceiver,
    conduit: Arc<dyn VoiceConduit>,
    frame_duration: Duration,
    position_us: Arc<AtomicU64>,
    cancel: CancellationToken,
    done: CompletionSender,
) {
    let mut done = SignalOnDrop(Some(done));
    let step = frame_duration.as_micros() as u64;
    let mut sent: u64 = 0;

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            next = frames.next_frame() => next,
        };
        match next {
            None => break Some(Ok(())),
            Some(Err(e)) => break Some(Err(as_stream_fault(e))),
            Some(Ok(frame)) => {
                let delivered = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break None,
                    r = conduit.send_frame(frame) => r,
                };
                if let Err(e) = delivered {
                    break Some(Err(as_stream_fault(e)));
                }
                sent += 1;
                position_us.fetch_add(step, Ordering::AcqRel);
            }
        }
    };

    // Release everything before the outcome becomes observable.
    drop(frames);
    drop(conduit);
    trace!("Send loop finished after {sent} frames");

    if let (Some(outcome), Some(sender)) = (outcome, done.0.take()) {
        sender.signal(outcome);
    }
}

/// Reports a fault if the send loop unwinds before writing its outcome.
struct SignalOnDrop(Option<CompletionSender>);

impl Drop for SignalOnDrop {
    fn drop(&mut self) {
        if let Some(done) = self.0.take() {
            done.signal(Err(Error::StreamFault("playback send loop aborted".into())));
        }
    }
}

fn as_stream_fault(e: Error) -> Error {
    match e {
        Error::StreamFault(_) => e,
        other => Error::StreamFault(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use luquito_common::models::EncodeOptions;
    use luquito_common::traits::MockVoiceConduit;

    fn permissive_conduit() -> MockVoiceConduit {
        let mut conduit = MockVoiceConduit::new();
        conduit.expect_set_bitrate().returning(|_| Ok(()));
        conduit.expect_set_sending().returning(|_| Ok(()));
        conduit.expect_send_frame().returning(|_| Ok(()));
        conduit
    }

    #[test]
    fn test_second_completion_write_is_dropped() {
        let (done, mut rx) = completion_channel();
        assert!(done.signal(Ok(())));
        assert!(!done.signal(Err(Error::StopRequested)));
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_end_of_input_signals_clean_completion() {
        let mut session = EncoderSession::spawn(EncodeOptions::default(), |sink, _cancel| async move {
            for _ in 0..5 {
                sink.push(Bytes::from_static(&[0; 4])).await;
            }
        });
        let mut conduit = MockVoiceConduit::new();
        conduit.expect_set_bitrate().withf(|kbps| *kbps == 120).times(1).returning(|_| Ok(()));
        conduit.expect_set_sending().withf(|on| *on).times(1).returning(|_| Ok(()));
        conduit.expect_send_frame().times(5).returning(|_| Ok(()));

        let (done, mut rx) = completion_channel();
        let mut stream = PlaybackStream::start(&mut session, Arc::new(conduit), done)
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(Ok(()))));
        assert_eq!(stream.playback_position(), Duration::from_millis(100));
        stream.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_failure_becomes_stream_fault() {
        let mut session = EncoderSession::spawn(EncodeOptions::default(), |sink, _cancel| async move {
            for _ in 0..3 {
                sink.push(Bytes::from_static(&[0; 4])).await;
            }
        });
        let mut conduit = MockVoiceConduit::new();
        conduit.expect_set_bitrate().returning(|_| Ok(()));
        conduit.expect_set_sending().returning(|_| Ok(()));
        conduit
            .expect_send_frame()
            .returning(|_| Err(Error::Platform("udp socket closed".into())));

        let (done, mut rx) = completion_channel();
        let _stream = PlaybackStream::start(&mut session, Arc::new(conduit), done)
            .await
            .unwrap();

        match rx.recv().await {
            Some(Err(Error::StreamFault(msg))) => assert!(msg.contains("udp socket closed")),
            other => panic!("expected stream fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_frames_can_only_be_streamed_once() {
        let mut session = EncoderSession::spawn(EncodeOptions::default(), |_sink, cancel| async move {
            cancel.cancelled().await;
        });
        let (done, _rx) = completion_channel();
        let _first = PlaybackStream::start(&mut session, Arc::new(permissive_conduit()), done.clone())
            .await
            .unwrap();
        let second = PlaybackStream::start(&mut session, Arc::new(permissive_conduit()), done).await;
        assert!(matches!(second, Err(Error::StreamFault(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_is_monotonic_while_streaming() {
        let mut session = EncoderSession::spawn(EncodeOptions::default(), |sink, _cancel| async move {
            for _ in 0..50 {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if !sink.push(Bytes::from_static(&[0; 4])).await {
                    return;
                }
            }
        });
        let (done, mut rx) = completion_channel();
        let stream = PlaybackStream::start(&mut session, Arc::new(permissive_conduit()), done)
            .await
            .unwrap();

        let mut last = Duration::ZERO;
        for _ in 0..30 {
            tokio::time::sleep(Duration::from_millis(37)).await;
            let now = stream.playback_position();
            assert!(now >= last, "position went backwards: {now:?} < {last:?}");
            last = now;
        }
        assert!(matches!(rx.recv().await, Some(Ok(()))));
        assert_eq!(stream.playback_position(), Duration::from_secs(1));
    }

    /// Accepts one frame per permit.
    struct GatedConduit {
        gate: tokio::sync::Semaphore,
    }

    #[async_trait::async_trait]
    impl VoiceConduit for GatedConduit {
        async fn set_bitrate(&self, _kbps: u32) -> Result<(), Error> {
            Ok(())
        }

        async fn set_sending(&self, _sending: bool) -> Result<(), Error> {
            Ok(())
        }

        async fn send_frame(&self, _frame: Bytes) -> Result<(), Error> {
            self.gate
                .acquire()
                .await
                .map_err(|_| Error::Platform("gate closed".into()))?
                .forget();
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_position_counts_only_frames_the_conduit_accepted() {
        let mut session = EncoderSession::spawn(EncodeOptions::default(), |sink, _cancel| async move {
            for _ in 0..5 {
                sink.push(Bytes::from_static(&[0; 4])).await;
            }
        });
        let conduit = Arc::new(GatedConduit {
            gate: tokio::sync::Semaphore::new(0),
        });
        let (done, mut rx) = completion_channel();
        let stream = PlaybackStream::start(&mut session, conduit.clone(), done)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stream.playback_position(), Duration::ZERO);

        conduit.gate.add_permits(2);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(stream.playback_position(), Duration::from_millis(40));

        conduit.gate.add_permits(3);
        assert!(matches!(rx.recv().await, Some(Ok(()))));
        assert_eq!(stream.playback_position(), Duration::from_millis(100));
    }
}
