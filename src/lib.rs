pub mod analyzer;
pub mod audio;
pub mod config;
pub mod mood;
pub mod partition;
pub mod player;
pub mod prefetch;
pub mod selector;
pub mod stop;
pub mod transition;

/// Audio file extensions we can decode
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    // Native (claxon)
    "flac",
    // Native (symphonia)
    "mp3", "ogg", "wav", "aif", "aiff", "m4a", "aac", "mp4",
];

/// Application name for XDG paths
pub const APP_NAME: &str = "moodmix";

/// Rate every track is decoded to and played at
pub const DEFAULT_SAMPLE_RATE: u32 = 22050;
