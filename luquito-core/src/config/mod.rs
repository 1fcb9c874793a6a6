pub mod audio_library;

pub use audio_library::AudioLibrary;
