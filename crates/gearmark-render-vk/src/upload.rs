// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use gearmark_math::{GearSet, Mat4, MeshRange};
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{creating, Result};

const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
  vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// A buffer and the memory bound to it.
pub struct Buffer {
  device: ash::Device,
  handle: vk::Buffer,
  memory: vk::DeviceMemory,
  size: vk::DeviceSize,
}

impl Buffer {
  pub fn new(
    ctx: &DeviceContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_flags: vk::MemoryPropertyFlags,
    what: &'static str,
  ) -> Result<Self> {
    let d = ctx.device();
    let ci = vk::BufferCreateInfo {
      size,
      usage,
      sharing_mode: vk::SharingMode::EXCLUSIVE,
      ..Default::default()
    };
    unsafe {
      let handle = d.create_buffer(&ci, None).map_err(creating(what))?;
      let mut buf = Buffer { device: d.clone(), handle, memory: vk::DeviceMemory::null(), size };

      let req = d.get_buffer_memory_requirements(handle);
      let mem_type = ctx.find_memory_type(req.memory_type_bits, memory_flags, memory_flags, what)?;
      let alloc = vk::MemoryAllocateInfo {
        allocation_size: req.size,
        memory_type_index: mem_type,
        ..Default::default()
      };
      buf.memory = d.allocate_memory(&alloc, None).map_err(creating(what))?;
      d.bind_buffer_memory(handle, buf.memory, 0).map_err(creating(what))?;
      Ok(buf)
    }
  }

  pub fn handle(&self) -> vk::Buffer {
    self.handle
  }

  pub fn size(&self) -> vk::DeviceSize {
    self.size
  }

  /// Map, copy, unmap. The memory must be host visible and coherent.
  pub fn write(&self, bytes: &[u8]) -> Result<()> {
    debug_assert!(bytes.len() as vk::DeviceSize <= self.size);
    unsafe {
      let ptr = self
        .device
        .map_memory(self.memory, 0, bytes.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())?;
      std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
      self.device.unmap_memory(self.memory);
    }
    Ok(())
  }
}

impl Drop for Buffer {
  fn drop(&mut self) {
    unsafe {
      self.device.destroy_buffer(self.handle, None);
      self.device.free_memory(self.memory, None);
    }
  }
}

/// The three gears in one immutable vertex buffer.
pub struct VertexBuffer {
  buffer: Buffer,
  ranges: [MeshRange; 3],
}

impl VertexBuffer {
  pub fn handle(&self) -> vk::Buffer {
    self.buffer.handle()
  }

  pub fn ranges(&self) -> &[MeshRange; 3] {
    &self.ranges
  }
}

/// Uploads the gear set with a single host write; no staging copy.
pub fn upload_mesh(ctx: &DeviceContext, gears: &GearSet) -> Result<VertexBuffer> {
  let bytes = gears.as_bytes();
  let buffer = Buffer::new(
    ctx,
    bytes.len() as vk::DeviceSize,
    vk::BufferUsageFlags::VERTEX_BUFFER,
    HOST_COHERENT,
    "vertex buffer",
  )?;
  buffer.write(bytes)?;
  debug!("uploaded {} gear vertices ({} bytes)", gears.vertices.len(), bytes.len());
  Ok(VertexBuffer { buffer, ranges: gears.ranges })
}

pub const UNIFORM_SIZE: vk::DeviceSize = std::mem::size_of::<[[f32; 4]; 4]>() as vk::DeviceSize;

/// Holds the projection matrix read by the vertex shader.
pub struct UniformBuffer {
  buffer: Buffer,
}

pub fn create_uniform_buffer(ctx: &DeviceContext) -> Result<UniformBuffer> {
  let buffer = Buffer::new(
    ctx,
    UNIFORM_SIZE,
    vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
    HOST_COHERENT,
    "uniform buffer",
  )?;
  buffer.write(bytemuck::bytes_of(&Mat4::IDENTITY.to_cols_array_2d()))?;
  Ok(UniformBuffer { buffer })
}

impl UniformBuffer {
  pub fn handle(&self) -> vk::Buffer {
    self.buffer.handle()
  }

  pub fn size(&self) -> vk::DeviceSize {
    self.buffer.size()
  }

  /// Records an in-stream update of the projection. Must be outside a
  /// render pass. The first barrier keeps the write behind earlier frames'
  /// vertex shader reads, the second makes it visible to this frame's.
  pub fn record_update(&self, device: &ash::Device, cmd: vk::CommandBuffer, projection: &Mat4) {
    let cols = projection.to_cols_array_2d();
    let barrier = |src_access, dst_access| vk::BufferMemoryBarrier {
      src_access_mask: src_access,
      dst_access_mask: dst_access,
      src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
      dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
      buffer: self.handle(),
      offset: 0,
      size: vk::WHOLE_SIZE,
      ..Default::default()
    };
    unsafe {
      device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::VERTEX_SHADER,
        vk::PipelineStageFlags::TRANSFER,
        vk::DependencyFlags::empty(),
        &[],
        &[barrier(vk::AccessFlags::UNIFORM_READ, vk::AccessFlags::TRANSFER_WRITE)],
        &[],
      );
      device.cmd_update_buffer(cmd, self.handle(), 0, bytemuck::bytes_of(&cols));
      device.cmd_pipeline_barrier(
        cmd,
        vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::VERTEX_SHADER,
        vk::DependencyFlags::empty(),
        &[],
        &[barrier(vk::AccessFlags::TRANSFER_WRITE, vk::AccessFlags::UNIFORM_READ)],
        &[],
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn uniform_holds_one_matrix() {
    assert_eq!(UNIFORM_SIZE, 64);
    // cmd_update_buffer wants a multiple of four no larger than 65536
    assert_eq!(UNIFORM_SIZE % 4, 0);
  }

  #[test]
  fn host_memory_flags() {
    assert!(HOST_COHERENT.contains(vk::MemoryPropertyFlags::HOST_VISIBLE));
    assert!(HOST_COHERENT.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
  }
}
