// SPDX-License-Identifier: CEPL-1.0
//! `gearmark.toml` plus command-line overrides.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use gearmark_render::{FramesInFlight, PresentPreference, RenderSize, SampleCount};
use gearmark_render_vk::HarnessOptions;
use serde::Deserialize;
use tracing::warn;

use crate::cli::Cli;

pub const DEFAULT_CONFIG: &str = "gearmark.toml";

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AppCfg {
    #[serde(default)]
    pub bench: BenchCfg,
}

/// Every key is optional; unset keys fall back to the built-in defaults.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BenchCfg {
    pub samples: Option<SampleCount>,
    pub present_mode: Option<PresentPreference>,
    pub device: Option<usize>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fullscreen: Option<bool>,
    pub frames_in_flight: Option<FramesInFlight>,
    pub duration_secs: Option<f64>,
    pub timeout_ms: Option<u64>,
    pub animate: Option<bool>,
}

pub fn parse_cfg(text: &str) -> Result<AppCfg> {
    Ok(toml::from_str(text)?)
}

/// An explicit path must exist and parse. The default file is optional and
/// a broken one is only warned about.
pub fn load_cfg(explicit: Option<&Path>) -> Result<AppCfg> {
    if let Some(path) = explicit {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        return parse_cfg(&text).with_context(|| format!("parsing {}", path.display()));
    }
    match fs::read_to_string(DEFAULT_CONFIG) {
        Ok(text) => Ok(parse_cfg(&text).unwrap_or_else(|e| {
            warn!("ignoring {DEFAULT_CONFIG}: {e}");
            AppCfg::default()
        })),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AppCfg::default()),
        Err(e) => {
            warn!("ignoring {DEFAULT_CONFIG}: {e}");
            Ok(AppCfg::default())
        }
    }
}

/// What the binary was asked to do, fully resolved.
#[derive(Debug, Clone)]
pub struct Settings {
    pub info: bool,
    pub verbose: bool,
    pub harness: HarnessOptions,
}

fn positive_secs(what: &str, secs: f64) -> Result<Duration> {
    if !(secs.is_finite() && secs > 0.0) {
        bail!("{what} must be a positive number of seconds, got {secs}");
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(d) => Ok(d),
        Err(e) => bail!("{what} of {secs} seconds is out of range: {e}"),
    }
}

/// Layers CLI flags over the file over the defaults.
pub fn resolve(cli: &Cli, file: &BenchCfg) -> Result<Settings> {
    let defaults = HarnessOptions::default();

    let samples = match cli.samples {
        Some(n) => SampleCount::new(n)?,
        None => file.samples.unwrap_or(defaults.samples),
    };
    let frames_in_flight = match cli.frames_in_flight {
        Some(n) => FramesInFlight::new(n)?,
        None => file.frames_in_flight.unwrap_or(defaults.frames_in_flight),
    };
    let size = cli.size.unwrap_or(RenderSize::new(
        file.width.unwrap_or(defaults.size.width),
        file.height.unwrap_or(defaults.size.height),
    ));
    if size.is_empty() {
        bail!("window size {size} has no area");
    }
    let sampling_window = match cli.duration.or(file.duration_secs) {
        Some(secs) => positive_secs("sampling window", secs)?,
        None => defaults.sampling_window,
    };
    let wait_timeout = match cli.timeout_ms.or(file.timeout_ms) {
        Some(0) => bail!("wait timeout must be at least 1 ms"),
        Some(ms) => Duration::from_millis(ms),
        None => defaults.wait_timeout,
    };

    Ok(Settings {
        info: cli.info,
        verbose: cli.verbose,
        harness: HarnessOptions {
            size,
            fullscreen: cli.fullscreen || file.fullscreen.unwrap_or(defaults.fullscreen),
            samples,
            present: cli.present().or(file.present_mode).unwrap_or(defaults.present),
            frames_in_flight,
            device_index: cli.device.or(file.device),
            sampling_window,
            wait_timeout,
            animate: !cli.no_animate && file.animate.unwrap_or(defaults.animate),
            validation: defaults.validation,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gearmark_render::ModelError;

    const SAMPLE: &str = r#"
[bench]
samples = 4
present_mode = "mailbox"
width = 640
height = 480
frames_in_flight = 1
duration_secs = 1.5
timeout_ms = 250
animate = false
"#;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(parse_cfg("").unwrap(), AppCfg::default());
        let s = resolve(&Cli::default(), &BenchCfg::default()).unwrap();
        assert_eq!(s.harness.size, RenderSize::new(1024, 800));
        assert_eq!(s.harness.samples, SampleCount::ONE);
        assert_eq!(s.harness.present, PresentPreference::Immediate);
        assert_eq!(s.harness.frames_in_flight.get(), 2);
        assert_eq!(s.harness.device_index, None);
        assert!(s.harness.animate);
        assert!(!s.info);
    }

    #[test]
    fn file_values_apply() {
        let cfg = parse_cfg(SAMPLE).unwrap();
        let s = resolve(&Cli::default(), &cfg.bench).unwrap();
        assert_eq!(s.harness.samples.get(), 4);
        assert_eq!(s.harness.present, PresentPreference::Mailbox);
        assert_eq!(s.harness.size, RenderSize::new(640, 480));
        assert_eq!(s.harness.frames_in_flight.get(), 1);
        assert_eq!(s.harness.sampling_window, Duration::from_millis(1500));
        assert_eq!(s.harness.wait_timeout, Duration::from_millis(250));
        assert!(!s.harness.animate);
    }

    #[test]
    fn cli_overrides_file() {
        let cfg = parse_cfg(SAMPLE).unwrap();
        let cli = Cli {
            samples: Some(2),
            present_fifo: true,
            size: Some(RenderSize::new(800, 600)),
            device: Some(1),
            duration: Some(3.0),
            ..Cli::default()
        };
        let s = resolve(&cli, &cfg.bench).unwrap();
        assert_eq!(s.harness.samples.get(), 2);
        assert_eq!(s.harness.present, PresentPreference::Fifo);
        assert_eq!(s.harness.size, RenderSize::new(800, 600));
        assert_eq!(s.harness.device_index, Some(1));
        assert_eq!(s.harness.sampling_window, Duration::from_secs(3));
        assert_eq!(s.harness.wait_timeout, Duration::from_millis(250));
    }

    #[test]
    fn unsupported_sample_count_is_rejected() {
        let cli = Cli {
            samples: Some(128),
            ..Cli::default()
        };
        let err = resolve(&cli, &BenchCfg::default()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ModelError>(),
            Some(&ModelError::UnsupportedSampleCount(128))
        );
        assert!(parse_cfg("[bench]\nsamples = 3\n").is_err());
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(parse_cfg("[bench]\nframes_in_flight = 3\n").is_err());
        assert!(parse_cfg("[bench]\nwidht = 3\n").is_err());
        assert!(parse_cfg("[bench]\npresent_mode = \"sometimes\"\n").is_err());
        let zero = BenchCfg {
            timeout_ms: Some(0),
            ..BenchCfg::default()
        };
        assert!(resolve(&Cli::default(), &zero).is_err());
        let negative = Cli {
            duration: Some(-1.0),
            ..Cli::default()
        };
        assert!(resolve(&negative, &BenchCfg::default()).is_err());
    }

    #[test]
    fn huge_durations_are_errors() {
        let cli = Cli {
            duration: Some(1e20),
            ..Cli::default()
        };
        let err = resolve(&cli, &BenchCfg::default()).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        let file = parse_cfg("[bench]\nduration_secs = 1e20\n").unwrap();
        assert!(resolve(&Cli::default(), &file.bench).is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(load_cfg(Some(Path::new("/nonexistent/gearmark.toml"))).is_err());
    }
}
