// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

use ash::vk;
use gearmark_platform::WsiError;
use gearmark_render::ModelError;
use thiserror::Error;

use crate::frame::SlotTransitionError;

/// How the render loop reacts to an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
  /// Nothing usable was set up. Fatal.
  Initialization,
  /// Stale swapchain or an expired wait. Recovered by recreating the swapchain.
  TransientPresentation,
  /// A GPU object could not be created. Fatal.
  ResourceCreation,
}

#[derive(Debug, Error)]
pub enum HarnessError {
  #[error("no Vulkan devices found")]
  NoDeviceFound,
  #[error("device index {index} out of range, {count} device(s) present")]
  InvalidDeviceIndex { index: usize, count: usize },
  #[error("no suitable device: {0}")]
  NoSuitableDevice(String),
  #[error("failed to create Vulkan instance: {0}")]
  InstanceCreateFailed(vk::Result),
  #[error("failed to create logical device: {0}")]
  DeviceCreateFailed(vk::Result),
  #[error("surface unsupported: {0}")]
  SurfaceUnsupported(String),
  #[error("sample count {0} not supported by the device")]
  UnsupportedSampleCount(u32),
  #[error("window handle unavailable: {0}")]
  Handle(#[from] raw_window_handle::HandleError),
  #[error(transparent)]
  Wsi(#[from] WsiError),
  #[error(transparent)]
  Model(#[from] ModelError),

  #[error("swapchain is out of date")]
  OutOfDate,
  #[error("{what} timed out after {after:?}")]
  Timeout { what: &'static str, after: Duration },

  #[error("failed to create {what}: {result}")]
  Create { what: &'static str, result: vk::Result },
  #[error("no memory type suitable for {0}")]
  NoMemoryType(&'static str),
  #[error("invalid SPIR-V for {name}: {source}")]
  Shader {
    name: &'static str,
    #[source]
    source: std::io::Error,
  },
  #[error(transparent)]
  Slot(#[from] SlotTransitionError),
  #[error("vulkan call failed: {0}")]
  Vulkan(#[from] vk::Result),
}

impl HarnessError {
  pub fn class(&self) -> ErrorClass {
    use HarnessError::*;
    match self {
      NoDeviceFound
      | InvalidDeviceIndex { .. }
      | NoSuitableDevice(_)
      | InstanceCreateFailed(_)
      | DeviceCreateFailed(_)
      | SurfaceUnsupported(_)
      | UnsupportedSampleCount(_)
      | Handle(_)
      | Wsi(_)
      | Model(_) => ErrorClass::Initialization,
      OutOfDate | Timeout { .. } => ErrorClass::TransientPresentation,
      Vulkan(r) if is_stale(*r) => ErrorClass::TransientPresentation,
      Create { .. } | NoMemoryType(_) | Shader { .. } | Slot(_) | Vulkan(_) => {
        ErrorClass::ResourceCreation
      }
    }
  }

  pub fn is_recoverable(&self) -> bool {
    self.class() == ErrorClass::TransientPresentation
  }

  /// Maps a failed wait, turning `TIMEOUT`/`NOT_READY` into [`HarnessError::Timeout`].
  pub(crate) fn from_wait(what: &'static str, after: Duration, r: vk::Result) -> Self {
    match r {
      vk::Result::TIMEOUT | vk::Result::NOT_READY => HarnessError::Timeout { what, after },
      vk::Result::ERROR_OUT_OF_DATE_KHR => HarnessError::OutOfDate,
      other => HarnessError::Vulkan(other),
    }
  }
}

pub(crate) fn creating(what: &'static str) -> impl FnOnce(vk::Result) -> HarnessError {
  move |result| HarnessError::Create { what, result }
}

fn is_stale(r: vk::Result) -> bool {
  matches!(r, vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR)
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn waits_that_expire_are_recoverable() {
    let e = HarnessError::from_wait("fence", Duration::from_millis(5), vk::Result::TIMEOUT);
    assert!(matches!(e, HarnessError::Timeout { what: "fence", .. }));
    assert!(e.is_recoverable());
    let e = HarnessError::from_wait("acquire", Duration::ZERO, vk::Result::NOT_READY);
    assert!(e.is_recoverable());
  }

  #[test]
  fn device_loss_is_fatal() {
    let e = HarnessError::from_wait("fence", Duration::ZERO, vk::Result::ERROR_DEVICE_LOST);
    assert_eq!(e.class(), ErrorClass::ResourceCreation);
    assert!(!e.is_recoverable());
  }

  #[test]
  fn classification() {
    assert_eq!(HarnessError::NoDeviceFound.class(), ErrorClass::Initialization);
    assert_eq!(HarnessError::UnsupportedSampleCount(64).class(), ErrorClass::Initialization);
    assert_eq!(
      HarnessError::Model(ModelError::UnsupportedSampleCount(128)).class(),
      ErrorClass::Initialization
    );
    assert_eq!(HarnessError::OutOfDate.class(), ErrorClass::TransientPresentation);
    assert_eq!(
      HarnessError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR).class(),
      ErrorClass::TransientPresentation
    );
    let e = creating("depth image")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
    assert_eq!(e.class(), ErrorClass::ResourceCreation);
    assert!(e.to_string().starts_with("failed to create depth image"));
  }
}
