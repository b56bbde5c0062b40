//! Integration tests for the mixer engine
//!
//! These tests drive the mixer from the outside the way an application does:
//! through `carousel-core`'s public API, against a recording backend for
//! exact command sequences and against the software backend for real
//! asynchronous completion.

use carousel_core::domain::{
    AudioBackend, AudioSource, Channel, ChannelId, CompletionNotifier, Mixer, MixerGroup,
    PcmBuffer, PlaybackParams, Scene, SettingsHandle, SoundSettings, SourceRef, StartPlayback,
    MAX_VOLUME,
};
use carousel_infra::audio::{RenderHandle, SoftwareBackend};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Start(ChannelId),
    Update(ChannelId),
    Restart(ChannelId),
    Stop(ChannelId),
}

/// Backend that records every command and keeps the notifier it was given
#[derive(Default)]
struct RecordingBackend {
    commands: Mutex<Vec<Command>>,
    params: Mutex<Vec<(ChannelId, PlaybackParams)>>,
    notifier: Mutex<Option<CompletionNotifier>>,
}

impl RecordingBackend {
    fn take(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.lock().unwrap())
    }

    fn stops(&self, id: ChannelId) -> usize {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == Command::Stop(id))
            .count()
    }

    fn last_params(&self) -> PlaybackParams {
        self.params.lock().unwrap().last().unwrap().1
    }

    fn notifier(&self) -> CompletionNotifier {
        self.notifier.lock().unwrap().clone().unwrap()
    }
}

impl AudioBackend for RecordingBackend {
    fn attach(&self, notifier: CompletionNotifier) {
        *self.notifier.lock().unwrap() = Some(notifier);
    }

    fn start_playback(&self, request: StartPlayback) {
        self.commands.lock().unwrap().push(Command::Start(request.id));
        self.params.lock().unwrap().push((request.id, request.params));
    }

    fn update_playback(&self, id: ChannelId, params: PlaybackParams, restart: bool) {
        let command = if restart {
            Command::Restart(id)
        } else {
            Command::Update(id)
        };
        self.commands.lock().unwrap().push(command);
        self.params.lock().unwrap().push((id, params));
    }

    fn stop_playback(&self, id: ChannelId) {
        self.commands.lock().unwrap().push(Command::Stop(id));
    }

    fn query_offset_seconds(&self, _id: ChannelId) -> f64 {
        0.25
    }
}

fn recording_mixer(sound: SoundSettings) -> (Mixer, Arc<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::default());
    let mixer = Mixer::new(backend.clone(), SettingsHandle::new(sound));
    (mixer, backend)
}

/// One second of 16-bit stereo silence at 44.1 kHz
fn silence(mixer: &Mixer) -> SourceRef {
    let buffer: Arc<dyn AudioSource> = Arc::new(PcmBuffer::from_s16(2, 44100, &vec![0; 88200]));
    mixer.add_source(buffer)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

// ============================================================================
// LIFECYCLE TESTS
// ============================================================================

#[test]
fn test_play_then_tick_updates_without_stopping() {
    let (mixer, backend) = recording_mixer(SoundSettings::default());
    let source = silence(&mixer);

    let channel = mixer.play(&source, 0, false).unwrap();
    assert!(channel.id().get() != 0);
    mixer.tick();

    assert_eq!(
        backend.take(),
        vec![Command::Start(channel.id()), Command::Update(channel.id())]
    );
    assert!(channel.is_playing());
}

#[test]
fn test_stop_then_tick_stops_exactly_once() {
    let (mixer, backend) = recording_mixer(SoundSettings::default());
    let source = silence(&mixer);
    let channel = mixer.play(&source, -1, false).unwrap();

    channel.stop();
    channel.stop();
    mixer.tick();
    mixer.tick();

    assert_eq!(backend.stops(channel.id()), 1);
    assert!(mixer.channel(channel.id()).is_none());
    assert!(mixer.is_empty());
    assert!(channel.is_done());
}

#[test]
fn test_completion_from_backend_thread_reaps_channel() {
    let (mixer, backend) = recording_mixer(SoundSettings::default());
    let source = silence(&mixer);
    let channel = mixer.play(&source, 0, true).unwrap();
    let id = channel.id();

    let notifier = backend.notifier();
    thread::spawn(move || {
        notifier.playback_ended(id);
        notifier.playback_ended(id);
    })
    .join()
    .unwrap();

    assert!(channel.is_done());
    assert_eq!(mixer.len(), 0);
    assert_eq!(mixer.registry_len(), 0);

    // Nothing is left to stop on the next tick
    mixer.tick();
    assert_eq!(backend.stops(id), 0);
}

#[test]
fn test_reaped_channel_setters_stay_local() {
    let (mixer, backend) = recording_mixer(SoundSettings::default());
    let source = silence(&mixer);
    let channel = mixer.play(&source, 0, false).unwrap();
    mixer.on_channel_ended(channel.id());
    backend.take();

    channel.set_volume(10);
    channel.set_pan(0.0);
    channel.set_rate(2.0);
    assert!(channel.set_offset(4));

    assert!(backend.take().is_empty());
    assert_eq!(channel.volume(), 10);
}

#[test]
fn test_unknown_completion_is_ignored() {
    let (mixer, backend) = recording_mixer(SoundSettings::default());
    let source = silence(&mixer);
    let channel = mixer.play(&source, 0, false).unwrap();

    backend.notifier().playback_ended(ChannelId::new(999).unwrap());

    assert_eq!(mixer.len(), 1);
    assert!(channel.is_playing());
}

#[test]
fn test_notifier_outliving_mixer_is_harmless() {
    let (mixer, backend) = recording_mixer(SoundSettings::default());
    let source = silence(&mixer);
    let channel = mixer.play(&source, 0, false).unwrap();
    let notifier = backend.notifier();

    drop(mixer);
    assert!(!notifier.is_attached());
    notifier.playback_ended(channel.id());

    // Closing the mixer stopped the channel on the backend
    assert_eq!(backend.stops(channel.id()), 1);
    assert!(channel.is_done());
}

#[test]
fn test_concurrent_ticks_and_completions() {
    let (mixer, backend) = recording_mixer(SoundSettings::default());
    let mixer = Arc::new(mixer);
    let source = silence(&mixer);

    let channels: Vec<Arc<Channel>> = (0..64)
        .map(|_| mixer.play(&source, -1, true).unwrap())
        .collect();
    let ids: Vec<ChannelId> = channels.iter().map(|c| c.id()).collect();

    let notifier = backend.notifier();
    let completer = thread::spawn(move || {
        for id in ids.iter().step_by(2) {
            notifier.playback_ended(*id);
        }
    });

    let ticker = {
        let mixer = Arc::clone(&mixer);
        let channels = channels.clone();
        thread::spawn(move || {
            for channel in channels.iter().skip(1).step_by(2) {
                channel.stop();
                mixer.tick();
            }
        })
    };

    completer.join().unwrap();
    ticker.join().unwrap();
    mixer.tick();

    assert!(mixer.is_empty());
    assert_eq!(mixer.registry_len(), 0);
    assert!(channels.iter().all(|c| c.is_done()));
    for channel in channels.iter().skip(1).step_by(2) {
        assert_eq!(backend.stops(channel.id()), 1);
    }
}

// ============================================================================
// SOURCE TESTS
// ============================================================================

#[test]
fn test_dangling_source_is_rejected() {
    let (mixer, backend) = recording_mixer(SoundSettings::default());

    let buffer = Arc::new(PcmBuffer::from_s16(1, 8000, &[1, 2, 3, 4]));
    let source = SourceRef::downgrade(&buffer);
    drop(buffer);

    assert!(mixer.play(&source, 0, false).is_none());
    assert!(mixer.play(&SourceRef::empty(), 0, false).is_none());
    assert_eq!(mixer.registry_len(), 0);
    assert!(backend.take().is_empty());
}

#[test]
fn test_released_sources_are_swept_on_tick() {
    let (mixer, _backend) = recording_mixer(SoundSettings::default());
    let buffer = Arc::new(PcmBuffer::from_s16(1, 8000, &[0; 64]));
    let pooled: Arc<dyn AudioSource> = buffer.clone();
    let source = mixer.add_source(pooled);

    let channel = mixer.play(&source, 0, false).unwrap();
    assert_eq!(mixer.source_count(), 1);

    buffer.release();
    drop(buffer);
    mixer.tick();

    assert_eq!(mixer.source_count(), 0);
    assert!(!source.is_alive());
    // The backend already holds its own copy of the samples
    assert!(channel.is_playing());
    assert!(mixer.play(&source, 0, false).is_none());
}

// ============================================================================
// VOLUME TESTS
// ============================================================================

#[test]
fn test_effective_volume_layers() {
    let (mixer, backend) = recording_mixer(SoundSettings::default());
    let source = silence(&mixer);
    let channel = mixer.play(&source, 0, false).unwrap();

    assert!((mixer.effective_volume(&channel) - 1.0).abs() < 1e-6);

    channel.set_volume(MAX_VOLUME / 2);
    assert!((backend.last_params().volume - 0.5).abs() < 1e-6);

    mixer.set_volume(0.5);
    assert!((backend.last_params().volume - 0.25).abs() < 1e-6);
}

#[test]
fn test_title_sequence_caps_sound_group() {
    let (mixer, _backend) = recording_mixer(SoundSettings::default());
    let source = silence(&mixer);
    let effect = mixer.play(&source, 0, false).unwrap();
    let theme = mixer.play(&source, 0, false).unwrap();
    theme.set_group(MixerGroup::TitleMusic);

    mixer.settings().set_scene(Scene::TitleSequence);

    assert!((mixer.effective_volume(&effect) - 0.75).abs() < 1e-6);
    assert!((mixer.effective_volume(&theme) - 1.0).abs() < 1e-6);
}

#[test]
fn test_master_disabled_silences_everything() {
    let (mixer, backend) = recording_mixer(SoundSettings::default());
    let source = silence(&mixer);
    let channel = mixer.play(&source, 0, false).unwrap();

    mixer.set_volume(0.0);
    mixer.settings().update(|sound| sound.master_sound_enabled = false);
    mixer.tick();

    assert_eq!(mixer.effective_volume(&channel), 0.0);
    assert_eq!(backend.last_params().volume, 0.0);
}

#[test]
fn test_settings_changes_reach_backend_on_tick() {
    let (mixer, backend) = recording_mixer(SoundSettings::default());
    let source = silence(&mixer);
    let _channel = mixer.play(&source, 0, false).unwrap();

    mixer.settings().update(|sound| sound.sound_volume = 0);
    mixer.tick();

    assert_eq!(backend.last_params().volume, 0.0);
}

// ============================================================================
// OFFSET TESTS
// ============================================================================

#[test]
fn test_offset_translates_through_format() {
    let (mixer, backend) = recording_mixer(SoundSettings::default());
    let source = silence(&mixer);
    let channel = mixer.play(&source, 0, false).unwrap();
    backend.take();

    // 0.25 s of 16-bit stereo at 44.1 kHz
    assert_eq!(channel.offset(), 44100);

    assert!(channel.set_offset(176_400 / 2));
    assert_eq!(backend.take(), vec![Command::Restart(channel.id())]);
    assert!((backend.last_params().offset_seconds - 0.5).abs() < 1e-9);
}

// ============================================================================
// SOFTWARE BACKEND END-TO-END
// ============================================================================

fn software_mixer(rate: u32) -> (Mixer, RenderHandle) {
    let (backend, handle) = SoftwareBackend::new(rate);
    let mixer = Mixer::new(Arc::new(backend), SettingsHandle::new(SoundSettings::default()));
    (mixer, handle)
}

#[test]
fn test_software_backend_natural_end_reaps_channel() {
    let (mixer, mut handle) = software_mixer(8000);
    let tone: Arc<dyn AudioSource> = Arc::new(PcmBuffer::from_s16(1, 8000, &[8000; 400]));
    let source = mixer.add_source(tone);
    let channel = mixer.play(&source, 1, true).unwrap();

    let mut block = vec![0.0f32; 256];
    let mut heard = false;
    for _ in 0..10 {
        handle.render(&mut block);
        heard |= block.iter().any(|s| *s > 0.0);
    }
    assert!(heard);
    assert_eq!(handle.voice_count(), 0);

    assert!(wait_until(Duration::from_secs(2), || mixer.is_empty()));
    assert!(channel.is_done());
    assert_eq!(mixer.registry_len(), 0);
}

#[test]
fn test_software_backend_reports_offset() {
    let (mixer, mut handle) = software_mixer(8000);
    let long: Arc<dyn AudioSource> = Arc::new(PcmBuffer::from_s16(1, 8000, &vec![0; 8000]));
    let source = mixer.add_source(long);
    let channel = mixer.play(&source, 0, false).unwrap();

    // 4 blocks of 100 stereo frames
    let mut block = vec![0.0f32; 200];
    for _ in 0..4 {
        handle.render(&mut block);
    }
    // 400 mono 16-bit frames
    assert!(channel.offset().abs_diff(800) <= 1);

    assert!(channel.set_offset(8000));
    handle.render(&mut block);
    assert!(channel.offset().abs_diff(8000 + 200) <= 1);
}

#[test]
fn test_software_backend_stop_silences_voice() {
    let (mixer, mut handle) = software_mixer(8000);
    let tone: Arc<dyn AudioSource> = Arc::new(PcmBuffer::from_s16(1, 8000, &[16000; 64]));
    let source = mixer.add_source(tone);
    let channel = mixer.play(&source, -1, false).unwrap();

    let mut block = vec![0.0f32; 64];
    handle.render(&mut block);
    assert!(block.iter().any(|s| *s != 0.0));

    channel.stop();
    mixer.tick();
    handle.render(&mut block);

    assert!(block.iter().all(|s| *s == 0.0));
    assert_eq!(handle.voice_count(), 0);
    assert!(mixer.is_empty());
}
