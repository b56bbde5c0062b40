//! Real-time paced output without an audio device
//!
//! Drives a [`RenderHandle`] from a background thread at the pace a sound
//! card would, discarding the samples. Used on machines without audio
//! hardware and in end-to-end tests.

use crate::audio::software::RenderHandle;
use carousel_core::domain::audio::{AudioError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub const DEFAULT_BLOCK_FRAMES: usize = 512;

pub struct HeadlessOutput {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl HeadlessOutput {
    pub fn start(render: RenderHandle) -> Result<Self> {
        Self::with_block_frames(render, DEFAULT_BLOCK_FRAMES)
    }

    pub fn with_block_frames(mut render: RenderHandle, block_frames: usize) -> Result<Self> {
        let rate = render.output_rate();
        if rate == 0 || block_frames == 0 {
            return Err(AudioError::InvalidConfiguration(format!(
                "Headless output needs a rate and block size, got {}Hz / {} frames",
                rate, block_frames
            )));
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let period = Duration::from_secs_f64(block_frames as f64 / rate as f64);

        info!(rate, block_frames, "Starting headless output");

        let thread = thread::Builder::new()
            .name("carousel-headless".to_string())
            .spawn(move || {
                let mut block = vec![0.0f32; block_frames * 2];
                let mut deadline = Instant::now();
                while flag.load(Ordering::Acquire) {
                    render.render(&mut block);
                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else {
                        // Fell behind; don't try to catch up in a burst
                        deadline = now;
                    }
                }
                debug!("Headless output stopped");
            })
            .map_err(|e| AudioError::StreamError(format!("Failed to spawn render thread: {}", e)))?;

        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for HeadlessOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
