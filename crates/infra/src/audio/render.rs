//! Backend-side voice table and software mixdown
//!
//! The renderer owns one voice per started channel, applies the commands the
//! mixer sends, and mixes every voice into interleaved stereo `f32` at the
//! output rate. Voices that run out of samples are reported so the backend
//! can notify the mixer.

use carousel_core::domain::backend::{PlaybackParams, StartPlayback};
use carousel_core::domain::channel::ChannelId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Commands travelling from the mixer thread to the render side
#[derive(Debug, Clone)]
pub enum BackendCommand {
    Start(StartPlayback),
    Update {
        id: ChannelId,
        params: PlaybackParams,
        restart: bool,
    },
    Stop(ChannelId),
}

/// One playing buffer
struct Voice {
    samples: Arc<[f32]>,
    channels: usize,
    frames: usize,
    sample_rate: u32,
    loops_remaining: i32,
    params: PlaybackParams,
    /// Read head in source frames
    position: f64,
}

impl Voice {
    fn new(request: StartPlayback) -> Self {
        let mut voice = Self {
            channels: request.channels.max(1) as usize,
            frames: request.frames,
            sample_rate: request.sample_rate,
            loops_remaining: request.loop_count,
            params: request.params,
            samples: request.samples,
            position: 0.0,
        };
        voice.seek(request.params.offset_seconds);
        voice
    }

    fn seek(&mut self, seconds: f64) {
        let position = seconds.max(0.0) * self.sample_rate as f64;
        self.position = position.min(self.frames as f64);
    }

    fn position_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.position / self.sample_rate as f64
    }

    fn is_finished(&self) -> bool {
        self.position >= self.frames as f64 && self.loops_remaining == 0
    }

    /// Left/right sample of source frame `index`; mono is duplicated
    fn frame(&self, index: usize) -> (f32, f32) {
        let base = index * self.channels;
        let left = self.samples.get(base).copied().unwrap_or(0.0);
        if self.channels == 1 {
            (left, left)
        } else {
            (left, self.samples.get(base + 1).copied().unwrap_or(0.0))
        }
    }

    fn gains(&self) -> (f32, f32) {
        let pan = self.params.pan.clamp(0.0, 1.0);
        let volume = self.params.volume.max(0.0);
        (
            volume * (2.0 * (1.0 - pan)).min(1.0),
            volume * (2.0 * pan).min(1.0),
        )
    }

    /// Consume the whole passes the read head has run past. Returns false
    /// when the voice has no repeats left to cover them.
    fn wrap(&mut self, length: f64) -> bool {
        let passes = (self.position / length).floor();
        if self.loops_remaining < 0 {
            self.position -= passes * length;
            return true;
        }
        if passes > self.loops_remaining as f64 {
            self.loops_remaining = 0;
            self.position = length;
            return false;
        }
        self.loops_remaining -= passes as i32;
        self.position -= passes * length;
        true
    }

    /// Mix into `out` (interleaved stereo). Returns true once the voice has ended.
    fn render(&mut self, out: &mut [f32], output_rate: u32) -> bool {
        if self.frames == 0 || output_rate == 0 {
            return true;
        }

        let step = self.params.rate * self.sample_rate as f64 / output_rate as f64;
        let length = self.frames as f64;
        if !step.is_finite() || step <= 0.0 || !self.position.is_finite() {
            self.loops_remaining = 0;
            self.position = length;
            return true;
        }
        let (left_gain, right_gain) = self.gains();

        for frame in out.chunks_exact_mut(2) {
            if self.position >= length && !self.wrap(length) {
                return true;
            }

            let index = self.position as usize;
            let frac = (self.position - index as f64) as f32;
            let next = if index + 1 < self.frames {
                index + 1
            } else if self.loops_remaining != 0 {
                0
            } else {
                index
            };

            let (l0, r0) = self.frame(index);
            let (l1, r1) = self.frame(next);
            frame[0] += (l0 + (l1 - l0) * frac) * left_gain;
            frame[1] += (r0 + (r1 - r0) * frac) * right_gain;

            self.position += step;
        }

        self.is_finished()
    }
}

/// Voice table driven by [`BackendCommand`]s
pub struct VoiceRenderer {
    output_rate: u32,
    voices: HashMap<ChannelId, Voice>,
    /// Ids stopped before their start arrived
    tombstones: HashSet<ChannelId>,
    highest_started: Option<ChannelId>,
    ended: Vec<ChannelId>,
}

impl VoiceRenderer {
    pub fn new(output_rate: u32) -> Self {
        Self {
            output_rate,
            voices: HashMap::new(),
            tombstones: HashSet::new(),
            highest_started: None,
            ended: Vec::new(),
        }
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn apply(&mut self, command: BackendCommand) {
        match command {
            BackendCommand::Start(request) => {
                let id = request.id;
                if self.tombstones.remove(&id) {
                    debug!(channel = %id, "Dropping start for a channel already stopped");
                    return;
                }
                self.highest_started = self.highest_started.max(Some(id));
                trace!(channel = %id, frames = request.frames, "Voice started");
                self.voices.insert(id, Voice::new(request));
            }
            BackendCommand::Update {
                id,
                params,
                restart,
            } => match self.voices.get_mut(&id) {
                Some(voice) => {
                    voice.params = params;
                    if restart {
                        voice.seek(params.offset_seconds);
                    }
                }
                None => trace!(channel = %id, "Ignoring update for unknown voice"),
            },
            BackendCommand::Stop(id) => {
                if self.voices.remove(&id).is_some() {
                    trace!(channel = %id, "Voice stopped");
                } else if self.highest_started < Some(id) {
                    // Only ids above anything started can still be in flight
                    self.tombstones.insert(id);
                }
            }
        }
    }

    /// Overwrite `out` (interleaved stereo) with the mix of every voice.
    /// Returns the ids that reached their natural end during this block.
    pub fn render(&mut self, out: &mut [f32]) -> &[ChannelId] {
        out.fill(0.0);
        self.ended.clear();

        for (id, voice) in self.voices.iter_mut() {
            if voice.render(out, self.output_rate) {
                self.ended.push(*id);
            }
        }
        for id in &self.ended {
            self.voices.remove(id);
        }

        &self.ended
    }

    pub fn position_seconds(&self, id: ChannelId) -> Option<f64> {
        self.voices.get(&id).map(Voice::position_seconds)
    }

    pub fn positions(&self) -> impl Iterator<Item = (ChannelId, f64)> + '_ {
        self.voices
            .iter()
            .map(|(id, voice)| (*id, voice.position_seconds()))
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.voices.contains_key(&id)
    }
}
