//! One-shot PCM conversion for full-buffer backends
//!
//! Backends that take whole buffers accept unsigned 8-bit or native signed
//! 16-bit samples. Everything else is converted to signed 16-bit once, at
//! play time, and then normalized to `f32` in `[-1, 1]`.

use crate::domain::audio::{AudioFormat, AudioSource, SampleFormat};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("buffer of {len} bytes is not a whole number of {sample_size}-byte samples")]
    TruncatedSample { len: usize, sample_size: usize },

    #[error("{0:?} samples must be converted before normalization")]
    NotNormalizable(SampleFormat),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Read a source's entire payload into memory
///
/// Sources may return short reads; reading continues until the reported
/// length is filled or a read yields nothing.
pub fn read_all_pcm(source: &dyn AudioSource) -> Vec<u8> {
    let length = source.length() as usize;
    let mut data = vec![0u8; length];
    let mut filled = 0;
    while filled < length {
        let read = source.read(filled as u64, &mut data[filled..]);
        if read == 0 {
            break;
        }
        filled += read.min(length - filled);
    }
    data.truncate(filled);
    data
}

/// Convert `data` to signed 16-bit native-endian, keeping channels and rate
pub fn convert_to_s16(format: AudioFormat, data: Vec<u8>) -> Result<(AudioFormat, Vec<u8>)> {
    if format.format == SampleFormat::S16_NATIVE {
        return Ok((format, data));
    }

    let sample_size = format.format.bytes_per_sample();
    if data.len() % sample_size != 0 {
        return Err(ConvertError::TruncatedSample {
            len: data.len(),
            sample_size,
        });
    }

    let mut out = Vec::with_capacity(data.len() / sample_size * 2);
    for chunk in data.chunks_exact(sample_size) {
        out.extend_from_slice(&decode_s16(format.format, chunk).to_ne_bytes());
    }

    trace!(from = ?format.format, bytes = out.len(), "Converted PCM to S16");

    let converted = AudioFormat {
        format: SampleFormat::S16_NATIVE,
        ..format
    };
    Ok((converted, out))
}

fn decode_s16(format: SampleFormat, chunk: &[u8]) -> i16 {
    match format {
        SampleFormat::U8 => ((chunk[0] as i16) - 128) << 8,
        SampleFormat::S8 => (chunk[0] as i8 as i16) << 8,
        SampleFormat::U16Le => (u16::from_le_bytes([chunk[0], chunk[1]]) ^ 0x8000) as i16,
        SampleFormat::U16Be => (u16::from_be_bytes([chunk[0], chunk[1]]) ^ 0x8000) as i16,
        SampleFormat::S16Le => i16::from_le_bytes([chunk[0], chunk[1]]),
        SampleFormat::S16Be => i16::from_be_bytes([chunk[0], chunk[1]]),
        SampleFormat::S32Le => {
            (i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) >> 16) as i16
        }
        SampleFormat::S32Be => {
            (i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) >> 16) as i16
        }
        SampleFormat::F32Le => {
            f32_to_s16(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        }
        SampleFormat::F32Be => {
            f32_to_s16(f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        }
    }
}

fn f32_to_s16(sample: f32) -> i16 {
    // NaN saturates to 0 through the cast
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

/// Normalize 8-bit unsigned or native 16-bit samples to `[-1, 1]`
pub fn normalize(format: SampleFormat, data: &[u8]) -> Result<Vec<f32>> {
    match format {
        SampleFormat::U8 => Ok(data
            .iter()
            .map(|&b| (b as i32 - 128) as f32 / 128.0)
            .collect()),
        f if f == SampleFormat::S16_NATIVE => Ok(data
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]) as f32 / 32768.0)
            .collect()),
        other => Err(ConvertError::NotNormalizable(other)),
    }
}
