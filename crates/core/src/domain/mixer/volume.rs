//! Perceptual volume adjustment
//!
//! Sliders are linear in the UI but loudness is not, so each configured
//! slider goes through a power curve before it scales a channel. The curves
//! are only recomputed when the observed slider value changes.

use crate::domain::channel::{MixerGroup, MAX_VOLUME};
use crate::domain::config::{Scene, SettingsSnapshot, SoundSettings};
use tracing::trace;

/// Exponent of the slider-to-gain power curve
pub const CURVE_EXPONENT: f32 = 10.0 / 6.0;

/// Ceiling for effects while the title sequence plays its theme
pub const TITLE_SEQUENCE_SOUND_CAP: f32 = 0.75;

/// Map a `0..=100` slider onto a perceptual gain factor
pub fn perceptual_curve(setting: i32) -> f32 {
    (setting.clamp(0, 100) as f32 / 100.0).powf(CURVE_EXPONENT)
}

/// Cached slider curves plus the mixer's master scalar
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeCurves {
    master: f32,
    sound_setting: Option<i32>,
    music_setting: Option<i32>,
    sound_adjust: f32,
    music_adjust: f32,
}

impl Default for VolumeCurves {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeCurves {
    pub fn new() -> Self {
        Self {
            master: 1.0,
            sound_setting: None,
            music_setting: None,
            sound_adjust: 1.0,
            music_adjust: 1.0,
        }
    }

    pub fn master(&self) -> f32 {
        self.master
    }

    /// Clamped to `[0, 1]`; non-finite values are ignored
    pub fn set_master(&mut self, master: f32) {
        if master.is_finite() {
            self.master = master.clamp(0.0, 1.0);
        }
    }

    pub fn sound_adjust(&self) -> f32 {
        self.sound_adjust
    }

    pub fn music_adjust(&self) -> f32 {
        self.music_adjust
    }

    /// Recompute whichever curve's slider moved. Returns true if anything changed.
    pub fn refresh(&mut self, settings: &SoundSettings) -> bool {
        let mut changed = false;
        if self.sound_setting != Some(settings.sound_volume) {
            self.sound_setting = Some(settings.sound_volume);
            self.sound_adjust = perceptual_curve(settings.sound_volume);
            changed = true;
        }
        if self.music_setting != Some(settings.ride_music_volume) {
            self.music_setting = Some(settings.ride_music_volume);
            self.music_adjust = perceptual_curve(settings.ride_music_volume);
            changed = true;
        }
        if changed {
            trace!(
                sound = self.sound_adjust,
                music = self.music_adjust,
                "Volume curves recomputed"
            );
        }
        changed
    }

    /// Linear `[0, 1]` volume for a channel of `volume` in `group`
    pub fn effective_volume(&self, volume: i32, group: MixerGroup, settings: &SettingsSnapshot) -> f32 {
        let sound = &settings.sound;
        let mut adjust = self.master;
        adjust *= if sound.master_sound_enabled {
            sound.master_volume as f32 / 100.0
        } else {
            0.0
        };

        match group {
            MixerGroup::Sound => {
                adjust *= self.sound_adjust;
                if settings.scene == Scene::TitleSequence {
                    adjust = adjust.min(TITLE_SEQUENCE_SOUND_CAP);
                }
            }
            MixerGroup::RideMusic | MixerGroup::TitleMusic => {
                adjust *= self.music_adjust;
            }
        }

        let linear = (volume.clamp(0, MAX_VOLUME) as f32 * adjust) / MAX_VOLUME as f32;
        linear.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(sound: SoundSettings, scene: Scene) -> SettingsSnapshot {
        SettingsSnapshot { sound, scene }
    }

    #[test]
    fn test_perceptual_curve() {
        assert_eq!(perceptual_curve(100), 1.0);
        assert_eq!(perceptual_curve(0), 0.0);
        assert!((perceptual_curve(50) - 0.5f32.powf(10.0 / 6.0)).abs() < 1e-6);
        assert_eq!(perceptual_curve(150), 1.0);
    }

    #[test]
    fn test_refresh_only_on_change() {
        let mut curves = VolumeCurves::new();
        let settings = SoundSettings::default();

        assert!(curves.refresh(&settings));
        assert!(!curves.refresh(&settings));

        let quieter = SoundSettings {
            ride_music_volume: 50,
            ..settings
        };
        assert!(curves.refresh(&quieter));
        assert_eq!(curves.sound_adjust(), 1.0);
        assert!(curves.music_adjust() < 1.0);
    }

    #[test]
    fn test_full_volume_is_unity() {
        let mut curves = VolumeCurves::new();
        let settings = snapshot(SoundSettings::default(), Scene::Playing);
        curves.refresh(&settings.sound);

        let volume = curves.effective_volume(MAX_VOLUME, MixerGroup::Sound, &settings);
        assert!((volume - 1.0).abs() < 1e-6);

        let half = curves.effective_volume(MAX_VOLUME / 2, MixerGroup::RideMusic, &settings);
        assert!((half - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_master_scalar_stays_in_range() {
        let settings = snapshot(SoundSettings::default(), Scene::Playing);
        let mut curves = VolumeCurves::new();
        curves.refresh(&settings.sound);

        curves.set_master(3.0);
        assert_eq!(curves.master(), 1.0);
        assert_eq!(curves.effective_volume(MAX_VOLUME, MixerGroup::Sound, &settings), 1.0);

        curves.set_master(-2.0);
        assert_eq!(curves.master(), 0.0);

        curves.set_master(0.5);
        curves.set_master(f32::NAN);
        curves.set_master(f32::INFINITY);
        assert_eq!(curves.master(), 0.5);
        let volume = curves.effective_volume(MAX_VOLUME, MixerGroup::Sound, &settings);
        assert!((volume - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_master_disabled_silences_everything() {
        let mut curves = VolumeCurves::new();
        curves.set_master(0.0);
        let sound = SoundSettings {
            master_sound_enabled: false,
            ..SoundSettings::default()
        };
        let settings = snapshot(sound, Scene::Playing);
        curves.refresh(&sound);

        for volume in [0, 1, 64, MAX_VOLUME] {
            for group in [MixerGroup::Sound, MixerGroup::RideMusic, MixerGroup::TitleMusic] {
                assert_eq!(curves.effective_volume(volume, group, &settings), 0.0);
            }
        }
    }

    #[test]
    fn test_title_sequence_caps_effects_only() {
        let mut curves = VolumeCurves::new();
        let settings = snapshot(SoundSettings::default(), Scene::TitleSequence);
        curves.refresh(&settings.sound);

        let effects = curves.effective_volume(MAX_VOLUME, MixerGroup::Sound, &settings);
        assert!((effects - TITLE_SEQUENCE_SOUND_CAP).abs() < 1e-6);

        let theme = curves.effective_volume(MAX_VOLUME, MixerGroup::TitleMusic, &settings);
        assert!((theme - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_master_volume_scales() {
        let mut curves = VolumeCurves::new();
        let sound = SoundSettings {
            master_volume: 50,
            ..SoundSettings::default()
        };
        let settings = snapshot(sound, Scene::Playing);
        curves.refresh(&sound);
        curves.set_master(0.5);

        let volume = curves.effective_volume(MAX_VOLUME, MixerGroup::Sound, &settings);
        assert!((volume - 0.25).abs() < 1e-6);
    }
}
