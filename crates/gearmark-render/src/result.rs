// SPDX-License-Identifier: CEPL-1.0
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Bumped whenever the workload changes so old and new scores are never compared.
pub const BENCHMARK_VERSION: u32 = 1;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("invalid window size `{0}` (expected WxH)")]
    InvalidSize(String),
    #[error("unsupported sample count {0} (expected 1, 2, 4, 8, 16, 32 or 64)")]
    UnsupportedSampleCount(u32),
    #[error("frames in flight must be 1 or 2, got {0}")]
    InvalidFramesInFlight(u32),
    #[error("malformed result line `{0}`")]
    MalformedResult(String),
}

/// The one line the benchmark writes to stdout: `Ver=<n>, Result:<fps>`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BenchmarkResult {
    pub version: u32,
    pub fps: f64,
}

impl BenchmarkResult {
    pub fn new(fps: f64) -> Self {
        Self {
            version: BENCHMARK_VERSION,
            fps,
        }
    }
}

impl fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ver={}, Result:{:.3}", self.version, self.fps)
    }
}

impl FromStr for BenchmarkResult {
    type Err = ModelError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let bad = || ModelError::MalformedResult(line.to_owned());
        let rest = line.trim().strip_prefix("Ver=").ok_or_else(bad)?;
        let (ver, fps) = rest.split_once(", Result:").ok_or_else(bad)?;
        let version = ver.trim().parse().map_err(|_| bad())?;
        let fps: f64 = fps.trim().parse().map_err(|_| bad())?;
        if !fps.is_finite() {
            return Err(bad());
        }
        Ok(Self { version, fps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_three_decimals() {
        let r = BenchmarkResult::new(1234.56789);
        assert_eq!(r.to_string(), "Ver=1, Result:1234.568");
    }

    #[test]
    fn small_scores_have_no_padding() {
        assert_eq!(BenchmarkResult::new(5.0).to_string(), "Ver=1, Result:5.000");
    }

    #[test]
    fn parses_what_the_caller_scans() {
        let r: BenchmarkResult = "Ver=1, Result:987.250\n".parse().unwrap();
        assert_eq!(r.version, 1);
        assert!((r.fps - 987.25).abs() < 1e-9);
        let padded: BenchmarkResult = "Ver=1, Result: 7.500".parse().unwrap();
        assert!((padded.fps - 7.5).abs() < 1e-9);
    }

    #[test]
    fn rejects_other_output() {
        for line in ["", "update window failed", "Ver=x, Result:1.0", "Ver=1 Result:1.0", "Ver=1, Result:NaN"] {
            assert!(line.parse::<BenchmarkResult>().is_err(), "{line}");
        }
    }
}
