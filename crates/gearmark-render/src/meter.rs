// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

pub const DEFAULT_SAMPLING_WINDOW: Duration = Duration::from_secs(3);

/// Counts frames from the first recorded one until the window elapses.
#[derive(Clone, Debug)]
pub struct FpsMeter {
    window: Duration,
    start: Option<Instant>,
    frames: u64,
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLING_WINDOW)
    }
}

impl FpsMeter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            start: None,
            frames: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Records one presented frame. Returns the rate once the window is over.
    pub fn record_frame(&mut self, now: Instant) -> Option<f64> {
        let start = *self.start.get_or_insert(now);
        self.frames += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed >= self.window && !elapsed.is_zero() {
            Some(self.frames as f64 / elapsed.as_secs_f64())
        } else {
            None
        }
    }

    /// Drops everything counted so far; the next frame starts a new window.
    pub fn restart(&mut self) {
        self.start = None;
        self.frames = 0;
    }
}
