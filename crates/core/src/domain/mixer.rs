//! Mixer engine and channel lifecycle management
//!
//! The mixer owns the live channels, the weak id registry used by completion
//! notifications, and the pool of sources. All three, plus the cached volume
//! curves, sit behind one lock so that a tick and an asynchronous completion
//! can never observe each other half-way.

pub mod registry;
pub mod source_pool;
pub mod volume;

pub use registry::ChannelRegistry;
pub use source_pool::SourcePool;
pub use volume::{perceptual_curve, VolumeCurves, TITLE_SEQUENCE_SOUND_CAP};

use crate::domain::audio::{AudioSource, SourceRef};
use crate::domain::backend::{AudioBackend, CompletionNotifier, PlaybackParams, StartPlayback};
use crate::domain::channel::{Channel, ChannelId};
use crate::domain::config::{SettingsHandle, SettingsSnapshot};
use crate::domain::convert::{self, ConvertError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Reasons a play request produced no channel
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlayError {
    #[error("source reference is empty or its source was dropped")]
    MissingSource,

    #[error("source cannot provide raw PCM to this backend")]
    IncompatibleSource,

    #[error("sample conversion failed: {0}")]
    Conversion(#[from] ConvertError),

    #[error("source reports no audio channels")]
    NoChannels,

    #[error("source reports a zero sample rate")]
    NoSampleRate,

    #[error("source contains no complete frames")]
    NoFrames,

    #[error("channel identifiers exhausted")]
    IdsExhausted,
}

pub type Result<T> = std::result::Result<T, PlayError>;

/// Structures guarded together by the mixer lock
struct MixerState {
    next_id: Option<ChannelId>,
    channels: Vec<Arc<Channel>>,
    registry: ChannelRegistry,
    sources: SourcePool,
    curves: VolumeCurves,
}

impl MixerState {
    fn new() -> Self {
        Self {
            next_id: Some(ChannelId::FIRST),
            channels: Vec::new(),
            registry: ChannelRegistry::new(),
            sources: SourcePool::new(),
            curves: VolumeCurves::new(),
        }
    }

    fn allocate_id(&mut self) -> Result<ChannelId> {
        let id = self.next_id.ok_or(PlayError::IdsExhausted)?;
        self.next_id = id.next();
        Ok(id)
    }

    /// Remove channels from the live list and the registry together
    fn remove_channels(&mut self, ids: &[ChannelId]) {
        self.channels.retain(|channel| !ids.contains(&channel.id()));
        for id in ids {
            self.registry.remove(*id);
        }
    }
}

/// State shared between the [`Mixer`] handle, its channels and the backend's notifier
pub(crate) struct MixerShared {
    backend: Arc<dyn AudioBackend>,
    settings: SettingsHandle,
    state: Mutex<MixerState>,
}

impl MixerShared {
    fn lock_state(&self) -> MutexGuard<'_, MixerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn params_for(
        curves: &VolumeCurves,
        settings: &SettingsSnapshot,
        channel: &Channel,
    ) -> PlaybackParams {
        let snapshot = channel.snapshot();
        PlaybackParams {
            rate: snapshot.rate,
            volume: curves.effective_volume(snapshot.volume, snapshot.group, settings),
            pan: snapshot.pan,
            offset_seconds: snapshot.format.bytes_to_seconds(snapshot.offset_bytes),
        }
    }

    /// Send a channel's parameters to the backend unless it is already done
    fn push_params(
        &self,
        curves: &VolumeCurves,
        settings: &SettingsSnapshot,
        channel: &Channel,
        restart: bool,
    ) {
        if channel.is_done() {
            return;
        }
        let params = Self::params_for(curves, settings, channel);
        trace!(channel = %channel.id(), ?params, restart, "Updating channel");
        self.backend.update_playback(channel.id(), params, restart);
    }

    /// Parameter push requested by a channel setter
    pub(crate) fn update_channel(&self, channel: &Channel, restart: bool) {
        let settings = self.settings.snapshot();
        let mut state = self.lock_state();
        // A channel already reaped must not resurrect its id on the backend
        if !state.registry.contains(channel.id()) {
            return;
        }
        state.curves.refresh(&settings.sound);
        self.push_params(&state.curves, &settings, channel, restart);
    }

    pub(crate) fn channel_offset_bytes(&self, channel: &Channel) -> u64 {
        let format = channel.format();
        if format.bytes_per_second() == 0 {
            return 0;
        }
        let seconds = self.backend.query_offset_seconds(channel.id());
        format.seconds_to_bytes(seconds)
    }

    pub(crate) fn on_channel_ended(&self, id: ChannelId) {
        let mut state = self.lock_state();
        match state.registry.find(id) {
            Some(channel) => {
                channel.mark_done();
                state.remove_channels(&[id]);
                debug!(channel = %id, remaining = state.channels.len(), "Channel ended");
            }
            None => {
                state.registry.remove(id);
                trace!(channel = %id, "Ignoring completion for unknown channel");
            }
        }
    }

    fn tick(&self) {
        let settings = self.settings.snapshot();
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.curves.refresh(&settings.sound);

        let mut finished = Vec::new();
        for channel in &state.channels {
            if channel.is_stopping() {
                self.backend.stop_playback(channel.id());
                channel.mark_done();
                finished.push(channel.id());
            } else if !channel.is_done() {
                self.push_params(&state.curves, &settings, channel, false);
            }
        }

        if !finished.is_empty() {
            state.remove_channels(&finished);
            debug!(
                stopped = finished.len(),
                remaining = state.channels.len(),
                "Reaped stopped channels"
            );
        }

        state.sources.sweep();
    }

    fn close(&self) {
        let mut state = self.lock_state();
        for channel in &state.channels {
            self.backend.stop_playback(channel.id());
            channel.mark_done();
        }
        let closed = state.channels.len();
        state.channels.clear();
        state.registry.clear();
        state.sources.clear();
        if closed > 0 {
            info!(closed, "Mixer closed");
        }
    }
}

/// Channel mixer bridging logical playback state to an audio backend
///
/// Dropping the mixer closes it: every live channel is stopped on the
/// backend and every pooled source is released.
pub struct Mixer {
    shared: Arc<MixerShared>,
}

impl Mixer {
    /// Create a mixer and attach it to `backend` for completion notifications
    pub fn new(backend: Arc<dyn AudioBackend>, settings: SettingsHandle) -> Self {
        let shared = Arc::new(MixerShared {
            backend,
            settings,
            state: Mutex::new(MixerState::new()),
        });
        shared
            .backend
            .attach(CompletionNotifier::new(Arc::downgrade(&shared)));
        info!("Mixer initialized");
        Self { shared }
    }

    /// The handle a backend uses to report natural completion
    pub fn notifier(&self) -> CompletionNotifier {
        CompletionNotifier::new(Arc::downgrade(&self.shared))
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.shared.settings
    }

    /// Start playing `source`, or return `None` if it cannot be played
    ///
    /// Failures are silent for the caller; the reason is logged. Use
    /// [`Mixer::try_play`] to inspect it.
    pub fn play(&self, source: &SourceRef, loop_count: i32, delete_on_done: bool) -> Option<Arc<Channel>> {
        match self.try_play(source, loop_count, delete_on_done) {
            Ok(channel) => Some(channel),
            Err(e) => {
                debug!(error = %e, "Play request rejected");
                None
            }
        }
    }

    /// Start playing `source`, reporting why no channel was created
    pub fn try_play(&self, source: &SourceRef, loop_count: i32, delete_on_done: bool) -> Result<Arc<Channel>> {
        let source_arc = source.upgrade().ok_or(PlayError::MissingSource)?;
        let format = source_arc.pcm_format().ok_or(PlayError::IncompatibleSource)?;

        let pcm = convert::read_all_pcm(source_arc.as_ref());
        let (format, pcm) = if format.format.is_backend_native() {
            (format, pcm)
        } else {
            convert::convert_to_s16(format, pcm)?
        };
        let samples = convert::normalize(format.format, &pcm)?;

        if format.channels == 0 {
            return Err(PlayError::NoChannels);
        }
        if format.sample_rate == 0 {
            return Err(PlayError::NoSampleRate);
        }
        let frames = samples.len() / format.channels as usize;
        if frames == 0 {
            return Err(PlayError::NoFrames);
        }
        // Copy into the shared buffer before taking the lock
        let samples: Arc<[f32]> = samples.into();

        let settings = self.shared.settings.snapshot();
        let mut guard = self.shared.lock_state();
        let state = &mut *guard;

        let id = state.allocate_id()?;
        let channel = Arc::new(Channel::new(id, Arc::downgrade(&self.shared)));
        channel.set_format(format);
        channel.play(source, loop_count);
        channel.set_delete_on_done(delete_on_done);

        state.channels.push(Arc::clone(&channel));
        state.registry.register(&channel);

        state.curves.refresh(&settings.sound);
        let params = MixerShared::params_for(&state.curves, &settings, &channel);

        debug!(
            channel = %id,
            %format,
            frames,
            loop_count,
            volume = params.volume,
            "Starting playback"
        );

        self.shared.backend.start_playback(StartPlayback {
            id,
            channels: format.channels,
            frames,
            sample_rate: format.sample_rate,
            samples,
            loop_count,
            params,
        });

        Ok(channel)
    }

    /// Set the master volume scalar and push it to every live channel
    pub fn set_volume(&self, volume: f32) {
        self.shared.lock_state().curves.set_master(volume);
        self.tick();
    }

    pub fn volume(&self) -> f32 {
        self.shared.lock_state().curves.master()
    }

    /// Reconcile logical channel state with the backend
    ///
    /// Stopped channels are stopped on the backend and reaped; every other
    /// live channel gets its current parameters pushed. Released sources are
    /// swept afterwards.
    pub fn tick(&self) {
        self.shared.tick();
    }

    /// Completion entry point for the backend; unknown ids are ignored
    pub fn on_channel_ended(&self, id: ChannelId) {
        self.shared.on_channel_ended(id);
    }

    /// Hand a source to the mixer's pool
    pub fn add_source(&self, source: Arc<dyn AudioSource>) -> SourceRef {
        self.shared.lock_state().sources.add(source)
    }

    /// Playback position of `channel` in bytes, 0 if its format is unset
    pub fn channel_offset_bytes(&self, channel: &Channel) -> u64 {
        self.shared.channel_offset_bytes(channel)
    }

    /// Effective linear volume the backend would receive for `channel`
    pub fn effective_volume(&self, channel: &Channel) -> f32 {
        let settings = self.shared.settings.snapshot();
        let mut state = self.shared.lock_state();
        state.curves.refresh(&settings.sound);
        let snapshot = channel.snapshot();
        state
            .curves
            .effective_volume(snapshot.volume, snapshot.group, &settings)
    }

    pub fn channel(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.shared.lock_state().registry.find(id)
    }

    /// Live channels in start order
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        self.shared.lock_state().channels.clone()
    }

    pub fn len(&self) -> usize {
        self.shared.lock_state().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn registry_len(&self) -> usize {
        self.shared.lock_state().registry.len()
    }

    pub fn source_count(&self) -> usize {
        self.shared.lock_state().sources.len()
    }

    /// Stop every channel on the backend and drop all mixer-owned state
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for Mixer {
    fn drop(&mut self) {
        self.shared.close();
    }
}
