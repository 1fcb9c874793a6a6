use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use mockall::automock;

use crate::error::Error;

/// Establishes voice conduits. Implemented over songbird in the core crate.
#[automock]
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    /// Join `channel_id` in `guild_id`. Every successful join must be matched by
    /// a `VoiceConduit::disconnect`.
    async fn join(&self, guild_id: u64, channel_id: u64) -> Result<Arc<dyn VoiceConduit>, Error>;
}

/// An established audio sending channel to one voice room.
#[automock]
#[async_trait]
pub trait VoiceConduit: Send + Sync {
    /// Target Opus bitrate for frames sent from now on.
    async fn set_bitrate(&self, kbps: u32) -> Result<(), Error>;

    /// Toggles the "currently transmitting" indicator.
    async fn set_sending(&self, sending: bool) -> Result<(), Error>;

    /// Forward one frame. Waits while the conduit applies back-pressure.
    async fn send_frame(&self, frame: Bytes) -> Result<(), Error>;

    /// Tear the connection down. Calling it twice is a no-op.
    async fn disconnect(&self) -> Result<(), Error>;
}
