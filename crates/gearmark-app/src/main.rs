// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use gearmark_core::init_tracing;
use gearmark_platform::Wsi;
use gearmark_render::BenchmarkResult;
use gearmark_render_vk::{open_device, print_info, GearsHarness, WINDOW_TITLE};
use tracing::{error, info};

mod cli;
mod config;

use cli::Cli;
use config::Settings;

fn main() -> ExitCode {
    // Usage errors exit here with status 2.
    let cli = Cli::parse_normalized();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            // Reaches the caller even with logging filtered out.
            eprintln!("gearmark: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let cfg = config::load_cfg(cli.config.as_deref())?;
    let settings = config::resolve(cli, &cfg.bench)?;
    info!(
        "size={} samples={} present={:?} frames_in_flight={}",
        settings.harness.size,
        settings.harness.samples,
        settings.harness.present,
        settings.harness.frames_in_flight.get()
    );

    let mut wsi = Wsi::init_display().context("window system unavailable")?;
    let size = settings.harness.size;
    wsi.init_window(WINDOW_TITLE, size.width, size.height, settings.harness.fullscreen)
        .context("failed to open the benchmark window")?;

    let outcome = if settings.info {
        dump_info(&wsi, &settings).map(|()| None)
    } else {
        bench(&mut wsi, &settings)
    };

    if let Ok(Some(result)) = &outcome {
        let mut out = io::stdout().lock();
        writeln!(out, "{result}")?;
        out.flush()?;
    }

    wsi.fini_window();
    wsi.fini_display();
    outcome.map(|_| ())
}

fn dump_info(wsi: &Wsi, settings: &Settings) -> Result<()> {
    let ctx = open_device(wsi, &settings.harness).context("device initialisation failed")?;
    let mut out = io::stdout().lock();
    print_info(&ctx, &mut out)?;
    out.flush()?;
    Ok(())
}

/// `None` when the window was closed before the sampling window elapsed.
fn bench(wsi: &mut Wsi, settings: &Settings) -> Result<Option<BenchmarkResult>> {
    let mut harness = GearsHarness::new(wsi, &settings.harness).context("benchmark setup failed")?;
    info!("rendering on {}", harness.device().device_name());
    let result = harness.run(wsi).context("benchmark aborted")?;
    if result.is_none() {
        info!("window closed before the measurement finished");
    }
    Ok(result)
}
