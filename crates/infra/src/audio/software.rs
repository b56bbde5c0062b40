//! In-process backend that renders channels in software
//!
//! [`SoftwareBackend`] is the half the mixer talks to: it forwards commands
//! over a crossbeam channel and answers position queries from a shared map.
//! [`RenderHandle`] is the half an output driver owns: each call to
//! [`RenderHandle::render`] drains pending commands, mixes one block and
//! publishes positions. Natural completions travel to a dedicated
//! `carousel-events` thread, which reports them to the mixer, so the mixer is
//! never re-entered from inside a backend call or from the audio callback.

use crate::audio::render::{BackendCommand, VoiceRenderer};
use carousel_core::domain::backend::{
    AudioBackend, CompletionNotifier, PlaybackParams, StartPlayback,
};
use carousel_core::domain::channel::ChannelId;
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

type PositionMap = Arc<Mutex<HashMap<ChannelId, f64>>>;

/// Mixer-facing half of the software engine
pub struct SoftwareBackend {
    output_rate: u32,
    commands: Sender<BackendCommand>,
    positions: PositionMap,
    ended: Mutex<Option<Receiver<ChannelId>>>,
}

/// Output-facing half of the software engine
pub struct RenderHandle {
    renderer: VoiceRenderer,
    commands: Receiver<BackendCommand>,
    positions: PositionMap,
    ended: Sender<ChannelId>,
}

impl SoftwareBackend {
    /// Create a backend rendering at `output_rate` Hz and the handle that drives it
    pub fn new(output_rate: u32) -> (Self, RenderHandle) {
        let (command_tx, command_rx) = unbounded();
        let (ended_tx, ended_rx) = unbounded();
        let positions: PositionMap = Arc::new(Mutex::new(HashMap::new()));

        info!(output_rate, "Software backend created");

        let backend = Self {
            output_rate,
            commands: command_tx,
            positions: Arc::clone(&positions),
            ended: Mutex::new(Some(ended_rx)),
        };
        let handle = RenderHandle {
            renderer: VoiceRenderer::new(output_rate),
            commands: command_rx,
            positions,
            ended: ended_tx,
        };
        (backend, handle)
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    fn send(&self, command: BackendCommand) {
        if let Err(e) = self.commands.send(command) {
            warn!("Render side is gone, dropping command: {:?}", e.into_inner());
        }
    }
}

impl AudioBackend for SoftwareBackend {
    fn attach(&self, notifier: CompletionNotifier) {
        let receiver = match self.ended.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(receiver) = receiver else {
            warn!("Software backend is already attached to a mixer");
            return;
        };

        let spawned = thread::Builder::new()
            .name("carousel-events".to_string())
            .spawn(move || {
                for id in receiver.iter() {
                    debug!(channel = %id, "Playback ended");
                    notifier.playback_ended(id);
                }
                debug!("Completion thread exiting");
            });
        if let Err(e) = spawned {
            warn!("Failed to spawn completion thread: {}", e);
        }
    }

    fn start_playback(&self, request: StartPlayback) {
        self.send(BackendCommand::Start(request));
    }

    fn update_playback(&self, id: ChannelId, params: PlaybackParams, restart: bool) {
        self.send(BackendCommand::Update {
            id,
            params,
            restart,
        });
    }

    fn stop_playback(&self, id: ChannelId) {
        self.send(BackendCommand::Stop(id));
    }

    fn query_offset_seconds(&self, id: ChannelId) -> f64 {
        let positions = match self.positions.lock() {
            Ok(positions) => positions,
            Err(poisoned) => poisoned.into_inner(),
        };
        positions.get(&id).copied().unwrap_or(0.0)
    }
}

impl RenderHandle {
    pub fn output_rate(&self) -> u32 {
        self.renderer.output_rate()
    }

    /// Fill `out` (interleaved stereo `f32`) with the next block
    pub fn render(&mut self, out: &mut [f32]) {
        for command in self.commands.try_iter() {
            self.renderer.apply(command);
        }

        for id in self.renderer.render(out) {
            // Fails only when no mixer ever attached and the backend is gone
            let _ = self.ended.send(*id);
        }

        // Never block the audio thread on a reader; the next block retries
        if let Ok(mut positions) = self.positions.try_lock() {
            positions.clear();
            positions.extend(self.renderer.positions());
        }
    }

    pub fn voice_count(&self) -> usize {
        self.renderer.voice_count()
    }
}
