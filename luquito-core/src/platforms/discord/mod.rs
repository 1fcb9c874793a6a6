pub mod gateway;
pub mod runtime;
pub mod songbird;

pub use gateway::DiscordGateway;
pub use runtime::DiscordPlatform;
pub use songbird::{SongbirdConduit, SongbirdConnector};
