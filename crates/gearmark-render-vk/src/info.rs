// SPDX-License-Identifier: CEPL-1.0
use std::io::{self, Write};

use ash::vk;

use crate::device::DeviceContext;

pub fn device_type_name(t: vk::PhysicalDeviceType) -> String {
  match t {
    vk::PhysicalDeviceType::OTHER => "other".into(),
    vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated GPU".into(),
    vk::PhysicalDeviceType::DISCRETE_GPU => "discrete GPU".into(),
    vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual GPU".into(),
    vk::PhysicalDeviceType::CPU => "CPU".into(),
    other => format!("Unknown ({:08x})", other.as_raw()),
  }
}

pub fn format_api_version(v: u32) -> String {
  format!(
    "{}.{}.{}",
    vk::api_version_major(v),
    vk::api_version_minor(v),
    vk::api_version_patch(v)
  )
}

pub fn write_device_info(
  out: &mut dyn Write,
  props: &vk::PhysicalDeviceProperties,
  name: &str,
  extensions: &[String],
) -> io::Result<()> {
  writeln!(out, "apiVersion    = {}", format_api_version(props.api_version))?;
  writeln!(out, "driverVersion = {:04x}", props.driver_version)?;
  writeln!(out, "vendorID      = {:04x}", props.vendor_id)?;
  writeln!(out, "deviceID      = {:04x}", props.device_id)?;
  writeln!(out, "deviceType    = {}", device_type_name(props.device_type))?;
  writeln!(out, "deviceName    = {name}")?;
  if !extensions.is_empty() {
    writeln!(out, "deviceExtensions:")?;
    for ext in extensions {
      writeln!(out, "\t{ext}")?;
    }
  }
  Ok(())
}

/// Writes the selected device's properties and extensions.
pub fn print_info(ctx: &DeviceContext, out: &mut dyn Write) -> io::Result<()> {
  write_device_info(out, ctx.properties(), &ctx.device_name(), ctx.extensions())?;
  out.flush()
}
