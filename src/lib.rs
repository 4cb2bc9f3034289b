pub mod analyzer;
pub mod composer;
pub mod config;
pub mod library;
pub mod matcher;
pub mod payload;
pub mod playback;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

/// Rhythm file extensions picked up by a library scan
pub const GROOVE_EXTENSIONS: &[&str] = &["mid", "midi"];

/// Audio file extensions the analyzer can decode
pub const AUDIO_EXTENSIONS: &[&str] = &["wav", "wave"];

/// Application name for XDG paths
pub const APP_NAME: &str = "bandmate";
