//! Audio formats and source abstractions
//!
//! This module defines the sample formats understood by the mixer and the
//! `AudioSource` trait that decoders implement. Decoding itself lives outside
//! the core; the mixer only needs raw bytes, a format and a length.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Errors that can occur in the audio subsystem
#[derive(Debug, Error)]
pub enum AudioError {
    /// Requested audio device was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Error in audio stream creation or processing
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Invalid configuration for audio device
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Device does not support the requested configuration
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;

/// Raw PCM sample encodings a source may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S8,
    U16Le,
    U16Be,
    S16Le,
    S16Be,
    S32Le,
    S32Be,
    F32Le,
    F32Be,
}

impl SampleFormat {
    /// Signed 16-bit in the byte order of the running machine
    #[cfg(target_endian = "little")]
    pub const S16_NATIVE: SampleFormat = SampleFormat::S16Le;
    #[cfg(target_endian = "big")]
    pub const S16_NATIVE: SampleFormat = SampleFormat::S16Be;

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::S8 => 1,
            SampleFormat::U16Le
            | SampleFormat::U16Be
            | SampleFormat::S16Le
            | SampleFormat::S16Be => 2,
            SampleFormat::S32Le
            | SampleFormat::S32Be
            | SampleFormat::F32Le
            | SampleFormat::F32Be => 4,
        }
    }

    /// Whether full-buffer backends accept this encoding without conversion
    pub fn is_backend_native(&self) -> bool {
        *self == SampleFormat::U8 || *self == Self::S16_NATIVE
    }
}

/// Format snapshot of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioFormat {
    pub fn new(format: SampleFormat, channels: u16, sample_rate: u32) -> Self {
        Self {
            format,
            channels,
            sample_rate,
        }
    }

    /// Bytes consumed by one second of audio; zero for an unset format
    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * self.format.bytes_per_sample() as u64
    }

    /// Convert a byte offset into seconds. Returns 0.0 when the format is unset.
    pub fn bytes_to_seconds(&self, bytes: u64) -> f64 {
        match self.bytes_per_second() {
            0 => 0.0,
            bps => bytes as f64 / bps as f64,
        }
    }

    /// Convert a position in seconds into a byte offset. Returns 0 when the format is unset.
    pub fn seconds_to_bytes(&self, seconds: f64) -> u64 {
        match self.bytes_per_second() {
            0 => 0,
            bps => (seconds.max(0.0) * bps as f64) as u64,
        }
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            format: SampleFormat::S16_NATIVE,
            channels: 0,
            sample_rate: 0,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}ch {}Hz",
            self.format, self.channels, self.sample_rate
        )
    }
}

/// A decoded audio stream the mixer can play
///
/// Implementations are owned by the mixer's source pool (or by the caller);
/// channels only ever hold a [`SourceRef`].
pub trait AudioSource: Send + Sync {
    /// Total payload length in bytes
    fn length(&self) -> u64;

    /// Copy bytes starting at `offset` into `dst`, returning how many were written
    fn read(&self, offset: u64, dst: &mut [u8]) -> usize;

    /// Capability query: the raw PCM format when this source can hand its
    /// whole payload to a full-buffer backend, `None` otherwise.
    fn pcm_format(&self) -> Option<AudioFormat>;

    /// Whether the owner has finished with this source and the pool may drop it
    fn is_released(&self) -> bool {
        false
    }
}

/// Non-owning reference from a channel (or caller) to an audio source
#[derive(Clone)]
pub struct SourceRef(Weak<dyn AudioSource>);

impl SourceRef {
    /// A reference that never resolves
    pub fn empty() -> Self {
        let weak: Weak<dyn AudioSource> = Weak::<PcmBuffer>::new();
        Self(weak)
    }

    /// Reference a concretely typed source without taking ownership
    pub fn downgrade<S: AudioSource + 'static>(source: &Arc<S>) -> Self {
        let weak: Weak<S> = Arc::downgrade(source);
        Self(weak)
    }

    pub fn upgrade(&self) -> Option<Arc<dyn AudioSource>> {
        self.0.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl Default for SourceRef {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<&Arc<dyn AudioSource>> for SourceRef {
    fn from(source: &Arc<dyn AudioSource>) -> Self {
        Self(Arc::downgrade(source))
    }
}

impl fmt::Debug for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRef")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// In-memory PCM source
#[derive(Debug)]
pub struct PcmBuffer {
    format: AudioFormat,
    data: Vec<u8>,
    released: AtomicBool,
}

impl PcmBuffer {
    pub fn new(format: AudioFormat, data: Vec<u8>) -> Self {
        Self {
            format,
            data,
            released: AtomicBool::new(false),
        }
    }

    /// Build a signed 16-bit native-endian buffer from interleaved samples
    pub fn from_s16(channels: u16, sample_rate: u32, samples: &[i16]) -> Self {
        let data = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();
        Self::new(
            AudioFormat::new(SampleFormat::S16_NATIVE, channels, sample_rate),
            data,
        )
    }

    /// Mark the buffer as no longer needed by its owner
    pub fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

impl AudioSource for PcmBuffer {
    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, offset: u64, dst: &mut [u8]) -> usize {
        let start = (offset as usize).min(self.data.len());
        let len = dst.len().min(self.data.len() - start);
        dst[..len].copy_from_slice(&self.data[start..start + len]);
        len
    }

    fn pcm_format(&self) -> Option<AudioFormat> {
        Some(self.format)
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}
