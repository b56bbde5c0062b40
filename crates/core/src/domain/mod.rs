//! Domain entities and business rules

pub mod audio;
pub mod backend;
pub mod channel;
pub mod config;
pub mod convert;
pub mod mixer;

// Re-export specific items to avoid ambiguous glob imports
pub use audio::{AudioError, AudioFormat, AudioSource, PcmBuffer, SampleFormat, SourceRef};
pub use backend::{AudioBackend, CompletionNotifier, PlaybackParams, StartPlayback};
pub use channel::{Channel, ChannelId, MixerGroup, StereoGain, MAX_VOLUME, MIN_RATE};
pub use config::{
    CarouselConfig, ConfigError, ConfigManager, OutputConfig, Scene, SettingsHandle,
    SettingsSnapshot, SettingsWatcher, SoundSettings,
};
pub use convert::ConvertError;
pub use mixer::{Mixer, PlayError};
