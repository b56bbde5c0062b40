//! Playback channels
//!
//! A [`Channel`] is one logical instance of a sound or music track. It only
//! holds state; every parameter change is forwarded to the owning mixer,
//! which decides whether the backend still needs to hear about it.

use crate::domain::audio::{AudioFormat, SourceRef};
use crate::domain::mixer::MixerShared;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};
use tracing::trace;

/// Upper bound of a channel's integer volume
pub const MAX_VOLUME: i32 = 128;

/// Slowest accepted playback rate; zero or negative rates would stall the backend
pub const MIN_RATE: f64 = 0.001;

/// Attenuation applied to the far side at full left/right pan
pub const PAN_RANGE_DB: f64 = 100.0;

/// Opaque channel identifier, unique for the lifetime of a mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(NonZeroU32);

impl ChannelId {
    pub const FIRST: ChannelId = ChannelId(NonZeroU32::MIN);

    /// Wrap a raw id. Zero is reserved as invalid.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// The id allocated after this one, if the space is not exhausted
    pub fn next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category selecting which volume curve applies to a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MixerGroup {
    #[default]
    Sound,
    RideMusic,
    TitleMusic,
}

/// Left/right gain multipliers derived from pan
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StereoGain {
    pub left: f32,
    pub right: f32,
}

impl StereoGain {
    pub const UNITY: StereoGain = StereoGain {
        left: 1.0,
        right: 1.0,
    };

    /// Pan law: the side the pan leans toward stays at unity, the other side
    /// is attenuated linearly in dB up to [`PAN_RANGE_DB`] at the extremes.
    pub fn from_pan(pan: f32) -> Self {
        let pan = if pan.is_finite() { pan.clamp(0.0, 1.0) } else { 0.5 };
        let decibels = (pan as f64 - 0.5).abs() * 2.0 * PAN_RANGE_DB;
        let attenuated = (1.0 / db_to_gain(decibels)) as f32;
        if pan <= 0.5 {
            Self {
                left: 1.0,
                right: attenuated,
            }
        } else {
            Self {
                left: attenuated,
                right: 1.0,
            }
        }
    }
}

/// Convert decibels to a linear gain factor
pub fn db_to_gain(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

#[derive(Debug, Clone)]
pub(crate) struct ChannelParams {
    pub(crate) source: SourceRef,
    pub(crate) format: AudioFormat,
    pub(crate) offset_bytes: u64,
    pub(crate) group: MixerGroup,
    pub(crate) rate: f64,
    pub(crate) loop_count: i32,
    pub(crate) volume: i32,
    pub(crate) gain: StereoGain,
    pub(crate) old_volume: i32,
    pub(crate) old_gain: StereoGain,
    pub(crate) pan: f32,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            source: SourceRef::empty(),
            format: AudioFormat::default(),
            offset_bytes: 0,
            group: MixerGroup::Sound,
            rate: 1.0,
            loop_count: 0,
            volume: MAX_VOLUME,
            gain: StereoGain::from_pan(0.5),
            old_volume: 0,
            old_gain: StereoGain::default(),
            pan: 0.5,
        }
    }
}

/// One active or fading playback instance
///
/// Channels are shared as `Arc<Channel>` between the mixer and the caller.
/// A fresh channel is `done` until [`Channel::play`] binds a source.
pub struct Channel {
    id: ChannelId,
    mixer: Weak<MixerShared>,
    params: Mutex<ChannelParams>,
    stopping: AtomicBool,
    done: AtomicBool,
    delete_on_done: AtomicBool,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, mixer: Weak<MixerShared>) -> Self {
        Self {
            id,
            mixer,
            params: Mutex::new(ChannelParams::default()),
            stopping: AtomicBool::new(false),
            done: AtomicBool::new(true),
            delete_on_done: AtomicBool::new(false),
        }
    }

    fn params(&self) -> MutexGuard<'_, ChannelParams> {
        self.params.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> ChannelParams {
        self.params().clone()
    }

    /// Forward the current parameters to the mixer, if it is still alive
    fn push(&self, restart: bool) {
        if let Some(mixer) = self.mixer.upgrade() {
            mixer.update_channel(self, restart);
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn source(&self) -> SourceRef {
        self.params().source.clone()
    }

    pub fn format(&self) -> AudioFormat {
        self.params().format
    }

    pub(crate) fn set_format(&self, format: AudioFormat) {
        self.params().format = format;
    }

    pub fn group(&self) -> MixerGroup {
        self.params().group
    }

    pub fn set_group(&self, group: MixerGroup) {
        self.params().group = group;
        self.push(false);
    }

    pub fn rate(&self) -> f64 {
        self.params().rate
    }

    pub fn set_rate(&self, rate: f64) {
        self.params().rate = rate.max(MIN_RATE);
        self.push(false);
    }

    pub fn loop_count(&self) -> i32 {
        self.params().loop_count
    }

    /// Takes effect the next time the channel is started
    pub fn set_loop(&self, loop_count: i32) {
        self.params().loop_count = loop_count;
    }

    pub fn volume(&self) -> i32 {
        self.params().volume
    }

    pub fn set_volume(&self, volume: i32) {
        self.params().volume = volume.clamp(0, MAX_VOLUME);
        self.push(false);
    }

    pub fn volume_l(&self) -> f32 {
        self.params().gain.left
    }

    pub fn volume_r(&self) -> f32 {
        self.params().gain.right
    }

    pub fn old_volume(&self) -> i32 {
        self.params().old_volume
    }

    pub fn old_volume_l(&self) -> f32 {
        self.params().old_gain.left
    }

    pub fn old_volume_r(&self) -> f32 {
        self.params().old_gain.right
    }

    /// Remember the current volume and gains as the transition start point
    pub fn update_old_volume(&self) {
        let mut params = self.params();
        params.old_volume = params.volume;
        params.old_gain = params.gain;
    }

    pub fn pan(&self) -> f32 {
        self.params().pan
    }

    pub fn set_pan(&self, pan: f32) {
        {
            let mut params = self.params();
            params.pan = if pan.is_finite() { pan.clamp(0.0, 1.0) } else { 0.5 };
            params.gain = StereoGain::from_pan(params.pan);
        }
        self.push(false);
    }

    /// Last byte offset requested through [`Channel::set_offset`]
    pub fn offset_bytes(&self) -> u64 {
        self.params().offset_bytes
    }

    /// Current playback position in bytes, as reported by the backend
    pub fn offset(&self) -> u64 {
        match self.mixer.upgrade() {
            Some(mixer) => mixer.channel_offset_bytes(self),
            None => 0,
        }
    }

    /// Seek to a byte offset. Fails without touching state when the channel's
    /// format cannot translate bytes into time.
    pub fn set_offset(&self, offset: u64) -> bool {
        {
            let mut params = self.params();
            if params.format.bytes_per_second() == 0 {
                return false;
            }
            params.offset_bytes = offset;
        }
        self.push(true);
        true
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn set_stopping(&self, stopping: bool) {
        self.stopping.store(stopping, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn set_done(&self, done: bool) {
        self.done.store(done, Ordering::Release);
    }

    /// Flag the channel done, returning whether this call made the transition
    pub(crate) fn mark_done(&self) -> bool {
        let first = !self.done.swap(true, Ordering::AcqRel);
        if first {
            trace!(channel = %self.id, "Channel done");
        }
        first
    }

    pub fn delete_on_done(&self) -> bool {
        self.delete_on_done.load(Ordering::Acquire)
    }

    pub fn set_delete_on_done(&self, delete: bool) {
        self.delete_on_done.store(delete, Ordering::Release);
    }

    pub fn is_playing(&self) -> bool {
        !self.is_done()
    }

    /// Bind a source and reset transient playback state
    pub fn play(&self, source: &SourceRef, loop_count: i32) {
        {
            let mut params = self.params();
            params.source = source.clone();
            params.loop_count = loop_count;
            params.offset_bytes = 0;
        }
        self.set_done(false);
    }

    /// Request a stop. Teardown happens on the mixer's next tick.
    pub fn stop(&self) {
        self.set_stopping(true);
    }

    /// The backend owns the sample stream, so there is nothing to read here
    pub fn read(&self, _dst: &mut [u8]) -> usize {
        0
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("stopping", &self.is_stopping())
            .field("done", &self.is_done())
            .field("params", &*self.params())
            .finish()
    }
}
