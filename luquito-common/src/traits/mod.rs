pub mod chat_traits;
pub mod voice_traits;

pub use chat_traits::{ChatGateway, MockChatGateway};
pub use voice_traits::{MockVoiceConduit, MockVoiceConnector, VoiceConduit, VoiceConnector};
