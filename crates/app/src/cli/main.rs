//! Carousel CLI Application

use anyhow::Context;
use carousel_core::domain::{
    AudioSource, CarouselConfig, Channel, ConfigManager, Mixer, MixerGroup, PcmBuffer, Scene,
    SettingsHandle, SettingsWatcher, MAX_VOLUME,
};
use carousel_infra::audio::{CpalOutput, HeadlessOutput, SoftwareBackend};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Sample rate of the generated test tone
const TONE_SAMPLE_RATE: u32 = 22050;

#[derive(Parser)]
#[command(name = "carousel")]
#[command(about = "Audio channel mixer", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding settings.toml (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play a sine tone through the mixer
    Tone(ToneArgs),

    /// Show the settings file and the effective sound settings
    Settings {
        /// Write default settings to the settings file
        #[arg(long)]
        init: bool,
    },
}

#[derive(clap::Args)]
struct ToneArgs {
    #[arg(long, default_value_t = 440.0)]
    frequency: f64,

    #[arg(long, default_value_t = 1.0)]
    seconds: f64,

    /// Stereo position, 0 is left and 1 is right
    #[arg(long, default_value_t = 0.5)]
    pan: f32,

    /// Channel volume, 0 to 128
    #[arg(long, default_value_t = MAX_VOLUME)]
    volume: i32,

    /// 0 plays once, -1 loops until interrupted, n repeats n more times
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    loops: i32,

    #[arg(long, value_enum, default_value_t = GroupArg::Sound)]
    group: GroupArg,

    /// Render without an audio device
    #[arg(long)]
    headless: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GroupArg {
    Sound,
    RideMusic,
    TitleMusic,
}

impl From<GroupArg> for MixerGroup {
    fn from(group: GroupArg) -> Self {
        match group {
            GroupArg::Sound => MixerGroup::Sound,
            GroupArg::RideMusic => MixerGroup::RideMusic,
            GroupArg::TitleMusic => MixerGroup::TitleMusic,
        }
    }
}

/// Keeps the chosen output driver alive
enum Output {
    Device(CpalOutput),
    Headless(HeadlessOutput),
}

impl Output {
    fn describe(&self) -> String {
        match self {
            Output::Device(output) => {
                let config = output.config();
                format!("device {}Hz/{}ch", config.sample_rate, config.channels)
            }
            Output::Headless(output) if output.is_running() => "headless".to_string(),
            Output::Headless(_) => "headless (stopped)".to_string(),
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => ConfigManager::default_config_dir()?,
    };
    let manager = ConfigManager::new(config_dir);

    match cli.command {
        Command::Tone(args) => run_tone(&manager, args).await,
        Command::Settings { init } => run_settings(&manager, init).await,
    }
}

async fn run_settings(manager: &ConfigManager, init: bool) -> anyhow::Result<()> {
    if init {
        manager
            .save(&CarouselConfig::default())
            .await
            .context("writing default settings")?;
        info!("Default settings written");
    }

    let config = manager.load().await;
    println!("{}", manager.config_path().display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Open the default audio device, or a headless renderer when asked to or
/// when no device is usable
fn open_output(
    headless: bool,
    fallback_rate: u32,
) -> anyhow::Result<(Arc<SoftwareBackend>, Output)> {
    if !headless {
        match CpalOutput::default_config() {
            Ok(device) => {
                let (backend, handle) = SoftwareBackend::new(device.sample_rate);
                match CpalOutput::start(handle) {
                    Ok(output) => return Ok((Arc::new(backend), Output::Device(output))),
                    Err(e) => warn!("Audio device unusable, falling back to headless: {}", e),
                }
            }
            Err(e) => warn!("No audio device, falling back to headless: {}", e),
        }
    }

    let (backend, handle) = SoftwareBackend::new(fallback_rate);
    let output = HeadlessOutput::start(handle).context("starting headless output")?;
    Ok((Arc::new(backend), Output::Headless(output)))
}

fn sine_tone(frequency: f64, seconds: f64) -> PcmBuffer {
    let frames = (seconds.max(0.0) * TONE_SAMPLE_RATE as f64) as usize;
    let samples: Vec<i16> = (0..frames)
        .map(|n| {
            let t = n as f64 / TONE_SAMPLE_RATE as f64;
            let value = (2.0 * std::f64::consts::PI * frequency * t).sin() * 0.5;
            (value * i16::MAX as f64) as i16
        })
        .collect();
    PcmBuffer::from_s16(1, TONE_SAMPLE_RATE, &samples)
}

async fn next_change(changes: &mut Option<broadcast::Receiver<PathBuf>>) -> PathBuf {
    let Some(rx) = changes.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(path) => return path,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                *changes = None;
                return std::future::pending().await;
            }
        }
    }
}

fn log_progress(channel: &Channel) {
    let format = channel.format();
    let seconds = format.bytes_to_seconds(channel.offset());
    debug!(channel = %channel.id(), position_seconds = seconds, "Playing");
}

async fn run_tone(manager: &ConfigManager, args: ToneArgs) -> anyhow::Result<()> {
    let config = manager.load().await;
    let settings = SettingsHandle::new(config.sound);
    if matches!(args.group, GroupArg::TitleMusic) {
        settings.set_scene(Scene::TitleSequence);
    }

    let watcher = match SettingsWatcher::new(manager.config_dir()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            debug!("Settings hot reload disabled: {}", e);
            None
        }
    };
    let mut changes = watcher.as_ref().map(SettingsWatcher::subscribe);

    let (backend, output) = open_output(args.headless, config.output.sample_rate)?;
    info!(output = %output.describe(), "Audio output ready");
    let mixer = Mixer::new(backend, settings.clone());

    let tone: Arc<dyn AudioSource> = Arc::new(sine_tone(args.frequency, args.seconds));
    let source = mixer.add_source(tone);
    let channel = mixer
        .try_play(&source, args.loops, true)
        .context("starting tone")?;
    channel.set_group(args.group.into());
    channel.set_volume(args.volume);
    channel.set_pan(args.pan);

    info!(
        channel = %channel.id(),
        frequency = args.frequency,
        seconds = args.seconds,
        effective_volume = mixer.effective_volume(&channel),
        "Playing tone"
    );

    let tick_rate = config.output.tick_rate_hz.max(1);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / tick_rate as f64));
    let mut ticks: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                mixer.tick();
                if channel.is_done() {
                    break;
                }
                ticks = ticks.wrapping_add(1);
                if ticks % tick_rate == 0 {
                    log_progress(&channel);
                }
            }
            path = next_change(&mut changes) => {
                debug!(path = %path.display(), "Settings changed");
                let reloaded = manager.load().await;
                settings.set_sound(reloaded.sound);
                info!(volume = mixer.effective_volume(&channel), "Settings reloaded");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                channel.stop();
                mixer.tick();
                break;
            }
        }
    }

    info!(channel = %channel.id(), "Tone finished");
    mixer.close();
    drop(output);
    Ok(())
}
