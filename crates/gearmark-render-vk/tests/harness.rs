// SPDX-License-Identifier: CEPL-1.0
//! Runs against a real GPU and display: `cargo test -- --ignored`.

use std::time::Duration;

use gearmark_platform::winit::dpi::PhysicalSize;
use gearmark_platform::Wsi;
use gearmark_render::{RenderSize, SampleCount};
use gearmark_render_vk::{GearsHarness, HarnessOptions, WINDOW_TITLE};

fn short_run(size: RenderSize) -> HarnessOptions {
    HarnessOptions {
        size,
        samples: SampleCount::ONE,
        sampling_window: Duration::from_millis(500),
        ..HarnessOptions::default()
    }
}

#[test]
#[ignore = "needs a Vulkan device and a display"]
fn measurement_resumes_after_resize() {
    let opts = short_run(RenderSize::new(640, 480));
    let mut wsi = Wsi::init_display().unwrap();
    wsi.init_window(WINDOW_TITLE, 640, 480, false).unwrap();
    let mut harness = GearsHarness::new(&wsi, &opts).unwrap();

    let before = harness.run(&mut wsi).unwrap().expect("window closed");
    assert!(before.fps > 0.0);

    let rebuilt = harness.recreations();
    let target = RenderSize::new(800, 600);
    let _ = wsi.window().unwrap().request_inner_size(PhysicalSize::new(target.width, target.height));

    // The window manager applies the resize asynchronously.
    let mut after = None;
    for _ in 0..10 {
        let result = harness.run(&mut wsi).unwrap().expect("window closed");
        if harness.render_size() == target {
            after = Some(result);
            break;
        }
    }
    let after = after.expect("swapchain never picked up the new window size");
    assert!(harness.recreations() > rebuilt);
    assert!(after.fps > 0.0);

    drop(harness);
    wsi.fini_window();
    wsi.fini_display();
}
