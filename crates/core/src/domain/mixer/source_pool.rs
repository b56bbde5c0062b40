//! Ownership of audio sources handed to the mixer
//!
//! Channels reference sources weakly, so the pool alone decides when a
//! source's memory goes away. Released sources are swept once per tick.

use crate::domain::audio::{AudioSource, SourceRef};
use std::sync::Arc;
use tracing::debug;

#[derive(Default)]
pub struct SourcePool {
    sources: Vec<Arc<dyn AudioSource>>,
}

impl SourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `source` and return a non-owning reference to it
    pub fn add(&mut self, source: Arc<dyn AudioSource>) -> SourceRef {
        let reference = SourceRef::from(&source);
        self.sources.push(source);
        reference
    }

    /// Drop every source whose owner released it. Returns how many went.
    pub fn sweep(&mut self) -> usize {
        let before = self.sources.len();
        self.sources.retain(|source| !source.is_released());
        let swept = before - self.sources.len();
        if swept > 0 {
            debug!(swept, remaining = self.sources.len(), "Swept released sources");
        }
        swept
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }
}
