//! Command/callback boundary to the audio rendering engine
//!
//! The mixer never renders samples itself. It talks to a backend through the
//! narrow [`AudioBackend`] command set and learns about natural completion
//! through the [`CompletionNotifier`] it hands the backend on construction.

use crate::domain::channel::ChannelId;
use crate::domain::mixer::MixerShared;
use std::fmt;
use std::sync::{Arc, Weak};

/// Per-channel parameters pushed to the backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackParams {
    /// Playback speed multiplier, always positive
    pub rate: f64,
    /// Effective linear volume in `[0, 1]`
    pub volume: f32,
    /// Stereo position in `[0, 1]`, 0.5 is centre
    pub pan: f32,
    /// Position to (re)start from when a restart is requested
    pub offset_seconds: f64,
}

impl Default for PlaybackParams {
    fn default() -> Self {
        Self {
            rate: 1.0,
            volume: 1.0,
            pan: 0.5,
            offset_seconds: 0.0,
        }
    }
}

/// Everything a backend needs to begin rendering a channel
#[derive(Clone)]
pub struct StartPlayback {
    pub id: ChannelId,
    pub channels: u16,
    pub frames: usize,
    pub sample_rate: u32,
    /// Interleaved samples normalized to `[-1, 1]`
    pub samples: Arc<[f32]>,
    /// 0 plays once, -1 loops forever, n > 0 repeats n more times
    pub loop_count: i32,
    pub params: PlaybackParams,
}

impl fmt::Debug for StartPlayback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartPlayback")
            .field("id", &self.id)
            .field("channels", &self.channels)
            .field("frames", &self.frames)
            .field("sample_rate", &self.sample_rate)
            .field("loop_count", &self.loop_count)
            .field("params", &self.params)
            .finish()
    }
}

/// Narrow command interface to a rendering engine
///
/// Commands are fire-and-forget. Implementations must tolerate stop, update
/// and query calls for ids they do not know, and must never call the
/// [`CompletionNotifier`] synchronously from inside one of these methods:
/// the mixer may be holding its lock while issuing a command.
pub trait AudioBackend: Send + Sync {
    /// Receive the handle used to report natural completion
    fn attach(&self, notifier: CompletionNotifier);

    /// Begin rendering; the backend keeps the sample buffer
    fn start_playback(&self, request: StartPlayback);

    /// Adjust a live channel. With `restart`, seek to `params.offset_seconds`.
    fn update_playback(&self, id: ChannelId, params: PlaybackParams, restart: bool);

    /// Terminate a channel and release its backend resources
    fn stop_playback(&self, id: ChannelId);

    /// Current playback position, 0.0 for unknown ids
    fn query_offset_seconds(&self, id: ChannelId) -> f64;
}

/// Context handle a backend uses to report that a channel finished on its own
///
/// It refers to its mixer weakly, so a notification that races with the
/// mixer's shutdown is dropped instead of touching freed state.
#[derive(Clone)]
pub struct CompletionNotifier {
    mixer: Weak<MixerShared>,
}

impl CompletionNotifier {
    pub(crate) fn new(mixer: Weak<MixerShared>) -> Self {
        Self { mixer }
    }

    /// A notifier bound to no mixer; every notification is ignored
    pub fn detached() -> Self {
        Self { mixer: Weak::new() }
    }

    /// Report that `id` reached its natural end
    pub fn playback_ended(&self, id: ChannelId) {
        if let Some(mixer) = self.mixer.upgrade() {
            mixer.on_channel_ended(id);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.mixer.strong_count() > 0
    }
}

impl fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionNotifier")
            .field("attached", &self.is_attached())
            .finish()
    }
}
