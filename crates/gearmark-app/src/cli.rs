// SPDX-License-Identifier: CEPL-1.0
use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use gearmark_render::{PresentPreference, RenderSize};

/// Long flags the old harness spelled with a single dash.
const LONG_FLAGS: &[&str] = &[
    "samples",
    "present-mailbox",
    "present-immediate",
    "present-fifo",
    "device",
    "size",
    "fullscreen",
    "info",
    "frames-in-flight",
    "duration",
    "timeout-ms",
    "config",
    "verbose",
    "no-animate",
];

#[derive(Parser, Debug, Default)]
#[command(
    name = "gearmark",
    author,
    version,
    about = "Vulkan gears benchmark; prints `Ver=<n>, Result:<fps>` on stdout"
)]
#[command(group(ArgGroup::new("present").args(["present_mailbox", "present_immediate", "present_fifo"])))]
pub struct Cli {
    /// MSAA sample count: 1, 2, 4, 8, 16, 32 or 64.
    #[arg(long, value_name = "N")]
    pub samples: Option<u32>,

    /// Prefer MAILBOX presentation.
    #[arg(long)]
    pub present_mailbox: bool,

    /// Prefer IMMEDIATE presentation (default).
    #[arg(long)]
    pub present_immediate: bool,

    /// Present with FIFO (vsync).
    #[arg(long)]
    pub present_fifo: bool,

    /// Physical device index; first suitable device when omitted.
    #[arg(long, value_name = "INDEX")]
    pub device: Option<usize>,

    /// Window size, e.g. `1280x720`.
    #[arg(long, value_name = "WxH")]
    pub size: Option<RenderSize>,

    #[arg(long)]
    pub fullscreen: bool,

    /// Print device properties and extensions, then exit.
    #[arg(long)]
    pub info: bool,

    /// Frames the CPU may record ahead of the GPU (1 or 2).
    #[arg(long, value_name = "N")]
    pub frames_in_flight: Option<u32>,

    /// Sampling window in seconds.
    #[arg(long, value_name = "SECS")]
    pub duration: Option<f64>,

    /// Fence and acquire wait timeout in milliseconds.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Config file; `gearmark.toml` in the working directory when omitted.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log progress to stderr.
    #[arg(long, short)]
    pub verbose: bool,

    /// Keep the gears still.
    #[arg(long)]
    pub no_animate: bool,
}

impl Cli {
    pub fn parse_normalized() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    pub fn present(&self) -> Option<PresentPreference> {
        if self.present_mailbox {
            Some(PresentPreference::Mailbox)
        } else if self.present_immediate {
            Some(PresentPreference::Immediate)
        } else if self.present_fifo {
            Some(PresentPreference::Fifo)
        } else {
            None
        }
    }
}

/// Rewrites `-samples 4` style arguments to `--samples 4`. Anything else
/// passes through untouched for clap to judge.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut out = Vec::new();
    for (i, arg) in args.into_iter().map(Into::into).enumerate() {
        if i == 0 {
            out.push(arg);
            continue;
        }
        let rewritten = arg.to_str().and_then(|s| {
            let rest = s.strip_prefix('-').filter(|r| !r.starts_with('-'))?;
            let name = rest.split_once('=').map_or(rest, |(n, _)| n);
            LONG_FLAGS.contains(&name).then(|| OsString::from(format!("-{s}")))
        });
        out.push(rewritten.unwrap_or(arg));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(normalize_args(std::iter::once("gearmark").chain(args.iter().copied())))
    }

    #[test]
    fn command_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn single_dash_spellings_are_accepted() {
        let cli = parse(&["-samples", "4", "-present-mailbox", "-size", "640x480", "-fullscreen"]).unwrap();
        assert_eq!(cli.samples, Some(4));
        assert_eq!(cli.present(), Some(PresentPreference::Mailbox));
        assert_eq!(cli.size, Some(RenderSize::new(640, 480)));
        assert!(cli.fullscreen);
    }

    #[test]
    fn single_dash_with_equals() {
        let cli = parse(&["-device=1", "-info"]).unwrap();
        assert_eq!(cli.device, Some(1));
        assert!(cli.info);
    }

    #[test]
    fn short_flags_are_left_alone() {
        let args = normalize_args(["gearmark", "-v", "--samples", "2", "-bogus"]);
        assert_eq!(args, ["gearmark", "-v", "--samples", "2", "-bogus"].map(OsString::from));
    }

    #[test]
    fn unknown_flags_are_usage_errors() {
        let err = parse(&["-bogus"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(parse(&["--size", "wide"]).is_err());
    }

    #[test]
    fn present_flags_are_exclusive() {
        assert!(parse(&["--present-mailbox", "--present-fifo"]).is_err());
        assert_eq!(parse(&[]).unwrap().present(), None);
        assert_eq!(parse(&["--present-fifo"]).unwrap().present(), Some(PresentPreference::Fifo));
    }

    #[test]
    fn sample_count_is_validated_later() {
        let cli = parse(&["--samples", "128"]).unwrap();
        assert_eq!(cli.samples, Some(128));
    }
}
