//! Platform side of carousel: software rendering and audio output drivers

pub mod audio;
