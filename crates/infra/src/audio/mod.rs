//! Audio backends for the mixer
//!
//! - [`software`]: in-process renderer implementing `AudioBackend`
//! - [`cpal_output`]: drives the renderer from the default CPAL device
//!   (WASAPI on Windows, ALSA/PulseAudio on Linux, CoreAudio on macOS)
//! - [`headless`]: drives the renderer at real-time pace with no device

pub mod cpal_output;
pub mod headless;
pub mod render;
pub mod software;

pub use cpal_output::{CpalOutput, OutputDeviceConfig};
pub use headless::HeadlessOutput;
pub use render::{BackendCommand, VoiceRenderer};
pub use software::{RenderHandle, SoftwareBackend};
