//! src/audio/active.rs
//!
//! Registry of the (at most one) playback attempt in flight. The command layer
//! routes `!stop` through here instead of writing into a shared channel, so a
//! stop with nothing streaming is rejected rather than left blocking.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use luquito_common::models::StopOutcome;

use crate::audio::stream::CompletionSender;
use crate::Error;

enum Slot {
    Empty,
    /// An attempt is joining or draining; stops are not accepted.
    Reserved(u64),
    /// An attempt is streaming and will observe a stop.
    Streaming(u64, CompletionSender),
}

#[derive(Clone)]
pub struct ActivePlayback {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    slot: Slot,
    next_id: u64,
}

impl ActivePlayback {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                slot: Slot::Empty,
                next_id: 1,
            })),
        }
    }

    /// Reserve the slot for a new attempt. Fails with `PlaybackBusy` if another
    /// attempt holds it. The slot is released when the guard drops.
    pub fn claim(&self) -> Result<PlaybackSlot, Error> {
        let mut inner = self.inner.lock();
        if !matches!(inner.slot, Slot::Empty) {
            return Err(Error::PlaybackBusy);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.slot = Slot::Reserved(id);
        Ok(PlaybackSlot {
            registry: self.clone(),
            id,
        })
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.inner.lock().slot, Slot::Empty)
    }

    /// Deliver a stop to the streaming attempt, if there is one.
    pub fn request_stop(&self) -> StopOutcome {
        let inner = self.inner.lock();
        match &inner.slot {
            Slot::Streaming(id, done) => {
                if done.signal(Err(Error::StopRequested)) {
                    info!("Stop delivered to playback #{id}");
                } else {
                    debug!("Playback #{id} already completing; stop had no effect");
                }
                StopOutcome::Delivered
            }
            Slot::Reserved(id) => {
                info!("Stop ignored: playback #{id} is not streaming");
                StopOutcome::NoActivePlayback
            }
            Slot::Empty => {
                info!("Stop ignored: nothing is playing");
                StopOutcome::NoActivePlayback
            }
        }
    }
}

impl Default for ActivePlayback {
    fn default() -> Self {
        Self::new()
    }
}

/// Ownership of the registry slot for one attempt.
pub struct PlaybackSlot {
    registry: ActivePlayback,
    id: u64,
}

impl PlaybackSlot {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Start accepting stops, delivered through `done`.
    pub fn arm(&self, done: CompletionSender) {
        let mut inner = self.registry.inner.lock();
        inner.slot = Slot::Streaming(self.id, done);
    }

    /// Stop accepting stops while keeping the slot reserved.
    pub fn disarm(&self) {
        let mut inner = self.registry.inner.lock();
        inner.slot = Slot::Reserved(self.id);
    }
}

impl Drop for PlaybackSlot {
    fn drop(&mut self) {
        let mut inner = self.registry.inner.lock();
        let owned = match inner.slot {
            Slot::Reserved(id) | Slot::Streaming(id, _) => id == self.id,
            Slot::Empty => false,
        };
        if owned {
            inner.slot = Slot::Empty;
        }
    }
}
