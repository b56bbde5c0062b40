//! Configuration management for Carousel
//!
//! This module provides:
//! - Sound settings consumed read-only by the mixer (master, effects and music volumes)
//! - TOML serialization of the settings file
//! - A shared [`SettingsHandle`] the application updates and the mixer reads
//! - Hot-reload support via file system watcher

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur during configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Name of the settings file inside the config directory
pub const SETTINGS_FILE: &str = "settings.toml";

/// Volume sliders and the master switch, all sliders in `0..=100`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundSettings {
    pub master_sound_enabled: bool,
    pub master_volume: i32,
    pub sound_volume: i32,
    pub ride_music_volume: i32,
}

impl Default for SoundSettings {
    fn default() -> Self {
        Self {
            master_sound_enabled: true,
            master_volume: 100,
            sound_volume: 100,
            ride_music_volume: 100,
        }
    }
}

impl SoundSettings {
    /// Copy with every slider forced into `0..=100`
    pub fn clamped(self) -> Self {
        Self {
            master_volume: self.master_volume.clamp(0, 100),
            sound_volume: self.sound_volume.clamp(0, 100),
            ride_music_volume: self.ride_music_volume.clamp(0, 100),
            ..self
        }
    }
}

/// Output stream preferences used by the concrete backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Rate the software renderer mixes at
    pub sample_rate: u32,

    /// Mixer ticks per second driven by the application loop
    pub tick_rate_hz: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            tick_rate_hz: 40,
        }
    }
}

/// Complete Carousel configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarouselConfig {
    pub sound: SoundSettings,
    pub output: OutputConfig,
}

impl CarouselConfig {
    /// Load configuration from TOML file
    #[instrument(skip(path))]
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&contents)?;

        debug!("Configuration loaded successfully");
        config.validated()
    }

    /// Save configuration to TOML file
    #[instrument(skip(self, path))]
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let toml_str = toml::to_string_pretty(self)?;
        fs::write(path, toml_str).await?;

        debug!("Configuration saved successfully");
        Ok(())
    }

    /// Clamp sliders and reject settings no backend can run with
    pub fn validated(mut self) -> Result<Self> {
        if self.output.sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "output.sample_rate must be positive".to_string(),
            ));
        }
        if self.output.tick_rate_hz == 0 {
            return Err(ConfigError::Invalid(
                "output.tick_rate_hz must be positive".to_string(),
            ));
        }
        self.sound = self.sound.clamped();
        Ok(self)
    }
}

/// Configuration manager
///
/// Manages the settings file at `~/.config/carousel/settings.toml`.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_path = config_dir.join(SETTINGS_FILE);

        Self {
            config_dir,
            config_path,
        }
    }

    /// Get the default config directory path
    ///
    /// Returns `~/.config/carousel` on Linux, the platform equivalent elsewhere
    pub fn default_config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("carousel"))
            .ok_or_else(|| ConfigError::Invalid("Could not determine config directory".to_string()))
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load configuration from file
    ///
    /// A missing file yields the defaults. A corrupt file is backed up next
    /// to the original and the defaults are returned.
    #[instrument(skip(self))]
    pub async fn load(&self) -> CarouselConfig {
        if !self.config_path.exists() {
            info!(
                path = %self.config_path.display(),
                "Settings file not found, using defaults"
            );
            return CarouselConfig::default();
        }

        match CarouselConfig::load_from_file(&self.config_path).await {
            Ok(config) => config,
            Err(e) => {
                error!(
                    path = %self.config_path.display(),
                    error = %e,
                    "Failed to load settings, using defaults"
                );

                let backup_path = self.config_path.with_extension("toml.corrupt");
                if let Err(copy_err) = fs::copy(&self.config_path, &backup_path).await {
                    error!(
                        path = %backup_path.display(),
                        error = %copy_err,
                        "Failed to backup corrupt settings"
                    );
                }

                CarouselConfig::default()
            }
        }
    }

    /// Save configuration to file
    #[instrument(skip(self, config))]
    pub async fn save(&self, config: &CarouselConfig) -> Result<()> {
        fs::create_dir_all(&self.config_dir).await?;
        config.save_to_file(&self.config_path).await
    }

    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }
}

/// File system watcher for hot-reload
pub struct SettingsWatcher {
    _watcher: notify::RecommendedWatcher,
    changes_tx: broadcast::Sender<PathBuf>,
}

impl SettingsWatcher {
    /// Watch `config_dir` and broadcast every changed settings path
    pub fn new(config_dir: &Path) -> Result<Self> {
        use notify::Watcher;

        let (changes_tx, _changes_rx) = broadcast::channel(32);
        let tx = changes_tx.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    for path in event.paths {
                        if path.file_name().is_some_and(|name| name == SETTINGS_FILE) {
                            let _ = tx.send(path);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Settings watch error"),
            }
        })?;

        watcher.watch(config_dir, notify::RecursiveMode::NonRecursive)?;

        info!(path = %config_dir.display(), "Settings watcher started");

        Ok(Self {
            _watcher: watcher,
            changes_tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PathBuf> {
        self.changes_tx.subscribe()
    }
}

/// Presentation mode of the host application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Scene {
    #[default]
    Playing,
    /// Title/idle screen; effects are capped below the title theme
    TitleSequence,
}

/// Settings as seen by one mixer computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettingsSnapshot {
    pub sound: SoundSettings,
    pub scene: Scene,
}

/// Shared, read-mostly view of the sound settings
///
/// The application writes through it (settings dialog, hot reload, scene
/// changes); the mixer only ever takes snapshots.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<SettingsSnapshot>>,
}

impl SettingsHandle {
    pub fn new(sound: SoundSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SettingsSnapshot {
                sound: sound.clamped(),
                scene: Scene::Playing,
            })),
        }
    }

    pub fn snapshot(&self) -> SettingsSnapshot {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_sound(&self, sound: SoundSettings) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .sound = sound.clamped();
        debug!(?sound, "Sound settings updated");
    }

    /// Modify the sound settings in place
    pub fn update(&self, f: impl FnOnce(&mut SoundSettings)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard.sound);
        guard.sound = guard.sound.clamped();
    }

    pub fn set_scene(&self, scene: Scene) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .scene = scene;
        debug!(?scene, "Scene changed");
    }
}
