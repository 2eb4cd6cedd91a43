// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

/// Installs the global subscriber. Output goes to stderr: stdout carries the
/// benchmark result line and nothing else.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}

/// Monotonic clock used by the render loop. Hands out the delta since the
/// previous tick; the first tick reports zero.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    last: Option<Instant>,
}

impl FrameClock {
    pub const fn new() -> Self {
        Self { last: None }
    }

    pub fn tick(&mut self) -> (Instant, Duration) {
        let now = Instant::now();
        let dt = self.last.map_or(Duration::ZERO, |prev| now - prev);
        self.last = Some(now);
        (now, dt)
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
