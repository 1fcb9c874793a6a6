// ================================================================
// File: luquito-common/src/error.rs
// ================================================================

use thiserror::Error;

/// Failures raised while opening an encoder session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The source file is missing, unreadable, or not decodable.
    #[error("could not open audio source: {0}")]
    OpenFailed(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Voice join error: {0}")]
    Join(String),

    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Mid-stream read, transcode or send fault. Ordinary end-of-stream is never reported as this.
    #[error("Stream fault: {0}")]
    StreamFault(String),

    /// External cancellation injected into a playback's completion channel.
    #[error("Stop requested")]
    StopRequested,

    #[error("A playback is already in progress")]
    PlaybackBusy,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    /// True for the caller-initiated stop, which is a clean termination rather than a fault.
    pub fn is_stop(&self) -> bool {
        matches!(self, Error::StopRequested)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Parse(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Parse(s.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Platform(e.to_string())
    }
}
