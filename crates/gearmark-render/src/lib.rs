// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral pieces of the gears benchmark: options, animation state,
//! the sampling window and the result line handed back to the caller.

pub mod animation;
pub mod meter;
pub mod options;
pub mod result;

pub use animation::{Animation, GearPose, ROTATION_SPEED_DEG_PER_SEC};
pub use meter::{FpsMeter, DEFAULT_SAMPLING_WINDOW};
pub use options::{FramesInFlight, PresentPreference, SampleCount};
pub use result::{BenchmarkResult, ModelError, BENCHMARK_VERSION};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for RenderSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for RenderSize {
    type Err = ModelError;

    /// Parses `WxH`. A missing height keeps the default height, like the
    /// old `-size` flag did.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ModelError::InvalidSize(s.to_owned());
        let mut parts = s.trim().splitn(2, |c: char| c == 'x' || c == 'X');
        let width = parts
            .next()
            .filter(|w| !w.is_empty())
            .ok_or_else(bad)?
            .parse::<u32>()
            .map_err(|_| bad())?;
        let height = match parts.next() {
            Some(h) => h.parse::<u32>().map_err(|_| bad())?,
            None => options::DEFAULT_SIZE.height,
        };
        let size = RenderSize::new(width, height);
        if size.is_empty() {
            return Err(bad());
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_width_by_height() {
        assert_eq!("640x480".parse::<RenderSize>().ok(), Some(RenderSize::new(640, 480)));
        assert_eq!("800X600".parse::<RenderSize>().ok(), Some(RenderSize::new(800, 600)));
    }

    #[test]
    fn width_only_keeps_default_height() {
        let s: RenderSize = "1280".parse().unwrap();
        assert_eq!(s, RenderSize::new(1280, options::DEFAULT_SIZE.height));
    }

    #[test]
    fn rejects_garbage_and_zero() {
        for bad in ["", "x480", "axb", "0x480", "640x0", "640x-1"] {
            assert!(bad.parse::<RenderSize>().is_err(), "{bad}");
        }
    }

    #[test]
    fn displays_as_w_x_h() {
        assert_eq!(RenderSize::new(1024, 800).to_string(), "1024x800");
    }
}
