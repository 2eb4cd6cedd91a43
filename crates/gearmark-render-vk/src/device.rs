// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, physical/logical device selection and the command pool.
//!
//! Objects are grouped into owners whose `Drop` releases them; the field order
//! of [`DeviceContext`] makes the device go first and the instance last.

use std::ffi::{c_char, c_void, CStr};

use ash::ext::debug_utils;
use ash::khr::{maintenance1, surface, swapchain};
use ash::{vk, Entry, Instance};
use gearmark_render::SampleCount;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, warn};

use crate::error::{creating, HarnessError, Result};

const APP_NAME: &CStr = c"Vulkan Benchmark";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Debug, Default)]
pub struct DeviceOptions {
  /// Explicit physical device; `None` takes the first suitable one.
  pub device_index: Option<usize>,
  /// Validation layer and debug messenger, when the loader has them.
  pub validation: bool,
}

unsafe extern "system" fn debug_callback(
  severity: vk::DebugUtilsMessageSeverityFlagsEXT,
  _types: vk::DebugUtilsMessageTypeFlagsEXT,
  data: *const vk::DebugUtilsMessengerCallbackDataEXT,
  _user: *mut c_void,
) -> vk::Bool32 {
  if data.is_null() || (*data).p_message.is_null() {
    return vk::FALSE;
  }
  let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
  if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
    error!(target: "vulkan", "{msg}");
  } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
    warn!(target: "vulkan", "{msg}");
  } else {
    debug!(target: "vulkan", "{msg}");
  }
  vk::FALSE
}

struct InstanceOwner {
  entry: Entry,
  instance: Instance,
  debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Drop for InstanceOwner {
  fn drop(&mut self) {
    unsafe {
      if let Some((loader, messenger)) = self.debug.take() {
        loader.destroy_debug_utils_messenger(messenger, None);
      }
      self.instance.destroy_instance(None);
    }
    debug!("instance destroyed");
  }
}

struct SurfaceOwner {
  loader: surface::Instance,
  surface: vk::SurfaceKHR,
}

impl Drop for SurfaceOwner {
  fn drop(&mut self) {
    unsafe { self.loader.destroy_surface(self.surface, None) };
    debug!("surface destroyed");
  }
}

struct DeviceOwner {
  device: ash::Device,
  cmd_pool: vk::CommandPool,
}

impl Drop for DeviceOwner {
  fn drop(&mut self) {
    unsafe {
      self.device.destroy_command_pool(self.cmd_pool, None);
      self.device.destroy_device(None);
    }
    debug!("device destroyed");
  }
}

fn has_layer(entry: &Entry, name: &CStr) -> bool {
  unsafe { entry.enumerate_instance_layer_properties() }
    .unwrap_or_default()
    .iter()
    .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == name))
}

fn has_instance_extension(entry: &Entry, name: &CStr) -> bool {
  unsafe { entry.enumerate_instance_extension_properties(None) }
    .unwrap_or_default()
    .iter()
    .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == name))
}

unsafe fn create_instance(entry: Entry, display: RawDisplayHandle, validation: bool) -> Result<InstanceOwner> {
  let app_info = vk::ApplicationInfo {
    p_application_name: APP_NAME.as_ptr(),
    application_version: 0,
    p_engine_name: APP_NAME.as_ptr(),
    engine_version: 0,
    api_version: vk::API_VERSION_1_1,
    ..Default::default()
  };

  let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display)
    .map_err(|e| HarnessError::SurfaceUnsupported(format!("no surface extensions for this display: {e}")))?
    .to_vec();

  let want_debug = validation && has_instance_extension(&entry, debug_utils::NAME);
  if want_debug {
    extensions.push(debug_utils::NAME.as_ptr());
  }
  let mut layers: Vec<*const c_char> = Vec::new();
  if validation {
    if has_layer(&entry, VALIDATION_LAYER) {
      layers.push(VALIDATION_LAYER.as_ptr());
    } else {
      warn!("validation layer not available");
    }
  }

  let create_info = vk::InstanceCreateInfo {
    p_application_info: &app_info,
    enabled_extension_count: extensions.len() as u32,
    pp_enabled_extension_names: extensions.as_ptr(),
    enabled_layer_count: layers.len() as u32,
    pp_enabled_layer_names: layers.as_ptr(),
    ..Default::default()
  };
  let instance = entry
    .create_instance(&create_info, None)
    .map_err(HarnessError::InstanceCreateFailed)?;

  let mut owner = InstanceOwner { entry, instance, debug: None };
  if want_debug {
    let loader = debug_utils::Instance::new(&owner.entry, &owner.instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
      message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
      message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
      pfn_user_callback: Some(debug_callback),
      ..Default::default()
    };
    match loader.create_debug_utils_messenger(&ci, None) {
      Ok(m) => owner.debug = Some((loader, m)),
      Err(e) => warn!("debug messenger unavailable: {e:?}"),
    }
  }
  Ok(owner)
}

/// Queue family that can both render and present to `surface`.
unsafe fn graphics_present_family(
  instance: &Instance,
  loader: &surface::Instance,
  surface: vk::SurfaceKHR,
  phys: vk::PhysicalDevice,
) -> Option<u32> {
  instance
    .get_physical_device_queue_family_properties(phys)
    .iter()
    .enumerate()
    .find(|(i, q)| {
      q.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        && loader
          .get_physical_device_surface_support(phys, *i as u32, surface)
          .unwrap_or(false)
    })
    .map(|(i, _)| i as u32)
}

unsafe fn device_extension_names(instance: &Instance, phys: vk::PhysicalDevice) -> Vec<String> {
  instance
    .enumerate_device_extension_properties(phys)
    .unwrap_or_default()
    .iter()
    .filter_map(|e| e.extension_name_as_c_str().ok())
    .map(|n| n.to_string_lossy().into_owned())
    .collect()
}

fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
  props
    .device_name_as_c_str()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|_| "<unnamed>".to_owned())
}

/// Picks a device by index or the first one with a graphics+present family
/// and `VK_KHR_swapchain`.
unsafe fn select_device(
  instance: &Instance,
  surf: &SurfaceOwner,
  index: Option<usize>,
) -> Result<(vk::PhysicalDevice, u32)> {
  let devices = instance.enumerate_physical_devices()?;
  if devices.is_empty() {
    return Err(HarnessError::NoDeviceFound);
  }

  let suitable = |phys: vk::PhysicalDevice| -> std::result::Result<u32, String> {
    let name = device_name(&instance.get_physical_device_properties(phys));
    let has_swapchain = device_extension_names(instance, phys)
      .iter()
      .any(|e| e.as_bytes() == swapchain::NAME.to_bytes());
    if !has_swapchain {
      return Err(format!("{name} lacks VK_KHR_swapchain"));
    }
    graphics_present_family(instance, &surf.loader, surf.surface, phys)
      .ok_or_else(|| format!("{name} has no queue family with graphics and present support"))
  };

  match index {
    Some(i) => {
      let phys = *devices.get(i).ok_or(HarnessError::InvalidDeviceIndex {
        index: i,
        count: devices.len(),
      })?;
      let family = suitable(phys).map_err(HarnessError::NoSuitableDevice)?;
      Ok((phys, family))
    }
    None => {
      let mut reasons = Vec::new();
      for &phys in &devices {
        match suitable(phys) {
          Ok(family) => return Ok((phys, family)),
          Err(why) => {
            debug!("skipping device: {why}");
            reasons.push(why);
          }
        }
      }
      Err(HarnessError::NoSuitableDevice(reasons.join("; ")))
    }
  }
}

/// First memory type allowed by `type_bits` whose flags contain `flags`.
pub fn pick_memory_type(
  props: &vk::PhysicalDeviceMemoryProperties,
  type_bits: u32,
  flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
  (0..props.memory_type_count).find(|&i| {
    type_bits & (1 << i) != 0 && props.memory_types[i as usize].property_flags.contains(flags)
  })
}

/// The device half of the benchmark context: everything that lives from
/// startup to shutdown.
pub struct DeviceContext {
  logical: DeviceOwner,
  surface: SurfaceOwner,
  instance: InstanceOwner,
  phys: vk::PhysicalDevice,
  props: vk::PhysicalDeviceProperties,
  mem_props: vk::PhysicalDeviceMemoryProperties,
  extensions: Vec<String>,
  queue: vk::Queue,
}

impl DeviceContext {
  pub fn new(display: RawDisplayHandle, window: RawWindowHandle, opts: &DeviceOptions) -> Result<Self> {
    unsafe {
      let instance = create_instance(Entry::linked(), display, opts.validation)?;

      let handle = ash_window::create_surface(&instance.entry, &instance.instance, display, window, None)
        .map_err(|e| HarnessError::SurfaceUnsupported(format!("surface creation failed: {e}")))?;
      let surface = SurfaceOwner {
        loader: surface::Instance::new(&instance.entry, &instance.instance),
        surface: handle,
      };

      let (phys, queue_family) = select_device(&instance.instance, &surface, opts.device_index)?;
      let props = instance.instance.get_physical_device_properties(phys);
      let mem_props = instance.instance.get_physical_device_memory_properties(phys);
      let extensions = device_extension_names(&instance.instance, phys);

      let mut device_exts = vec![swapchain::NAME.as_ptr()];
      if extensions.iter().any(|e| e.as_bytes() == maintenance1::NAME.to_bytes()) {
        device_exts.push(maintenance1::NAME.as_ptr());
      }

      let priorities = [1.0_f32];
      let qinfo = vk::DeviceQueueCreateInfo {
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
      };
      let dinfo = vk::DeviceCreateInfo {
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
      };
      let device = instance
        .instance
        .create_device(phys, &dinfo, None)
        .map_err(HarnessError::DeviceCreateFailed)?;
      let queue = device.get_device_queue(queue_family, 0);

      let pool_info = vk::CommandPoolCreateInfo {
        queue_family_index: queue_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
      };
      let cmd_pool = match device.create_command_pool(&pool_info, None) {
        Ok(p) => p,
        Err(e) => {
          device.destroy_device(None);
          return Err(creating("command pool")(e));
        }
      };

      info!(
        "using {} (queue family {queue_family}, api {}.{}.{})",
        device_name(&props),
        vk::api_version_major(props.api_version),
        vk::api_version_minor(props.api_version),
        vk::api_version_patch(props.api_version),
      );

      Ok(Self {
        logical: DeviceOwner { device, cmd_pool },
        surface,
        instance,
        phys,
        props,
        mem_props,
        extensions,
        queue,
      })
    }
  }

  pub fn instance(&self) -> &Instance {
    &self.instance.instance
  }

  pub fn device(&self) -> &ash::Device {
    &self.logical.device
  }

  pub fn physical_device(&self) -> vk::PhysicalDevice {
    self.phys
  }

  pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
    &self.props
  }

  pub fn device_name(&self) -> String {
    device_name(&self.props)
  }

  pub fn extensions(&self) -> &[String] {
    &self.extensions
  }

  pub fn queue(&self) -> vk::Queue {
    self.queue
  }

  pub fn command_pool(&self) -> vk::CommandPool {
    self.logical.cmd_pool
  }

  pub fn surface(&self) -> vk::SurfaceKHR {
    self.surface.surface
  }

  pub fn surface_loader(&self) -> &surface::Instance {
    &self.surface.loader
  }

  pub fn swapchain_loader(&self) -> swapchain::Device {
    swapchain::Device::new(self.instance(), self.device())
  }

  pub fn format_supports(&self, format: vk::Format, feature: vk::FormatFeatureFlags) -> bool {
    let props = unsafe {
      self
        .instance()
        .get_physical_device_format_properties(self.phys, format)
    };
    props.optimal_tiling_features.contains(feature)
  }

  /// Sample counts usable for both colour and depth framebuffer attachments.
  pub fn framebuffer_sample_counts(&self) -> vk::SampleCountFlags {
    self.props.limits.framebuffer_color_sample_counts & self.props.limits.framebuffer_depth_sample_counts
  }

  pub fn check_sample_count(&self, samples: SampleCount) -> Result<()> {
    let flag = vk::SampleCountFlags::from_raw(samples.get());
    if self.framebuffer_sample_counts().contains(flag) {
      Ok(())
    } else {
      Err(HarnessError::UnsupportedSampleCount(samples.get()))
    }
  }

  /// Memory type for `req`, trying `preferred` before `fallback`.
  pub fn find_memory_type(
    &self,
    type_bits: u32,
    preferred: vk::MemoryPropertyFlags,
    fallback: vk::MemoryPropertyFlags,
    what: &'static str,
  ) -> Result<u32> {
    pick_memory_type(&self.mem_props, type_bits, preferred)
      .or_else(|| pick_memory_type(&self.mem_props, type_bits, fallback))
      .ok_or(HarnessError::NoMemoryType(what))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn mem_props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
    let mut props = vk::PhysicalDeviceMemoryProperties {
      memory_type_count: types.len() as u32,
      ..Default::default()
    };
    for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
      slot.property_flags = flags;
    }
    props
  }

  #[test]
  fn memory_type_respects_type_bits() {
    let props = mem_props(&[
      vk::MemoryPropertyFlags::DEVICE_LOCAL,
      vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
      vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
    ]);
    assert_eq!(pick_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(0));
    assert_eq!(pick_memory_type(&props, 0b110, vk::MemoryPropertyFlags::DEVICE_LOCAL), Some(2));
    assert_eq!(
      pick_memory_type(&props, 0b111, vk::MemoryPropertyFlags::LAZILY_ALLOCATED),
      Some(2)
    );
    assert_eq!(pick_memory_type(&props, 0b011, vk::MemoryPropertyFlags::LAZILY_ALLOCATED), None);
  }

  #[test]
  fn memory_type_ignores_types_past_count() {
    let props = mem_props(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
    assert_eq!(pick_memory_type(&props, u32::MAX, vk::MemoryPropertyFlags::DEVICE_LOCAL), None);
  }
}
