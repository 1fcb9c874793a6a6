pub mod chat;
pub mod playback;

pub use chat::{ChannelMessage, IncomingMessage};
pub use playback::{
    EncodeOptions,
    EncodeStats,
    PlaybackOutcome,
    PlaybackRequest,
    PlaybackState,
    StopOutcome,
};
