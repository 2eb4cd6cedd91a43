// SPDX-License-Identifier: CEPL-1.0
//! Vulkan gears benchmark built on `ash`.
//!
//! [`GearsHarness`] owns the device, the swapchain, the frame ring and the
//! uploaded meshes, and renders until the sampling window closes.

pub mod device;
pub mod error;
pub mod frame;
pub mod harness;
pub mod info;
pub mod pipeline;
pub mod swapchain;
pub mod upload;

pub use device::{DeviceContext, DeviceOptions};
pub use error::{ErrorClass, HarnessError, Result};
pub use frame::{FrameRing, SlotState, SlotTracker};
pub use harness::{open_device, GearsHarness, HarnessOptions, LoopInput, WINDOW_TITLE};
pub use info::print_info;
pub use pipeline::PushConstants;
pub use swapchain::{SurfaceConfig, Swapchain};
