//! Carousel core: channel mixer domain
//!
//! Tracks concurrently playing sound and music channels, computes their
//! effective volume from layered settings, and keeps an external rendering
//! backend in sync through a narrow command/callback interface.

pub mod domain;
