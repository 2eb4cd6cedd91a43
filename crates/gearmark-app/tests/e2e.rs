// SPDX-License-Identifier: CEPL-1.0
use std::process::{Command, Output};

use gearmark_render::BenchmarkResult;

fn gearmark(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gearmark"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to spawn gearmark")
}

fn stdout_of(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn reports_a_positive_rate() {
    let out = gearmark(&["-samples", "1", "-size", "640x480"]);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = stdout_of(&out);
    let line = stdout.lines().next().expect("no result line");
    let result: BenchmarkResult = line.parse().unwrap();
    assert_eq!(result.version, gearmark_render::BENCHMARK_VERSION);
    assert!(result.fps > 0.0);
    let (_, fps) = line.split_once("Result:").unwrap();
    let (int, frac) = fps.split_once('.').unwrap();
    assert!(!int.is_empty() && int.bytes().all(|b| b.is_ascii_digit()));
    assert!(!frac.is_empty() && frac.bytes().all(|b| b.is_ascii_digit()));
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn info_mode_lists_the_device() {
    let out = gearmark(&["-info"]);
    assert!(out.status.success());
    let stdout = stdout_of(&out);
    assert!(stdout.contains("deviceName"));
    assert!(!stdout.contains("Result:"));
}

#[test]
fn unsupported_sample_count_fails_without_a_result() {
    let out = gearmark(&["-samples", "128"]);
    assert!(!out.status.success());
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout_of(&out).is_empty());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unsupported sample count 128"));
}

#[test]
fn unknown_flag_prints_usage() {
    let out = gearmark(&["-bogus"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stdout_of(&out).is_empty());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Usage"));
}

#[test]
fn failures_are_reported_with_logging_off() {
    let out = Command::new(env!("CARGO_BIN_EXE_gearmark"))
        .args(["-samples", "128"])
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to spawn gearmark");
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("gearmark: "), "stderr: {stderr}");
    assert!(stderr.contains("unsupported sample count 128"));
}
