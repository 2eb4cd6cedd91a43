// SPDX-License-Identifier: CEPL-1.0
use std::ffi::CStr;
use std::io::Cursor;

use ash::util::read_spv;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use gearmark_math::gear::GEAR_VERTEX_STRIDE;
use gearmark_math::Mat4;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{creating, HarnessError, Result};
use crate::swapchain::SurfaceConfig;
use crate::upload::UniformBuffer;

static GEAR_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/gear.vert.spv"));
static GEAR_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/gear.frag.spv"));

/// Per-draw data: model-view matrix and material colour, 76 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
  pub modelview: [[f32; 4]; 4],
  pub color: [f32; 3],
}

impl PushConstants {
  pub fn new(modelview: Mat4, color: [f32; 3]) -> Self {
    Self { modelview: modelview.to_cols_array_2d(), color }
  }
}

pub const PUSH_CONSTANTS_SIZE: u32 = std::mem::size_of::<PushConstants>() as u32;

pub const ATTACHMENT_PRESENT: u32 = 0;
pub const ATTACHMENT_DEPTH: u32 = 1;
pub const ATTACHMENT_MSAA: u32 = 2;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Present (or resolve) target, depth, then the multisample target when
/// `samples > 1`.
pub fn attachment_descriptions(config: &SurfaceConfig) -> Vec<vk::AttachmentDescription> {
  let msaa = config.is_multisampled();
  let mut attachments = vec![
    vk::AttachmentDescription {
      format: config.surface_format.format,
      samples: vk::SampleCountFlags::TYPE_1,
      load_op: if msaa { vk::AttachmentLoadOp::DONT_CARE } else { vk::AttachmentLoadOp::CLEAR },
      store_op: vk::AttachmentStoreOp::STORE,
      stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
      stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
      initial_layout: vk::ImageLayout::UNDEFINED,
      final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
      ..Default::default()
    },
    vk::AttachmentDescription {
      format: config.depth_format,
      samples: config.samples,
      load_op: vk::AttachmentLoadOp::CLEAR,
      store_op: vk::AttachmentStoreOp::DONT_CARE,
      stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
      stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
      initial_layout: vk::ImageLayout::UNDEFINED,
      final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
      ..Default::default()
    },
  ];
  if msaa {
    attachments.push(vk::AttachmentDescription {
      format: config.surface_format.format,
      samples: config.samples,
      load_op: vk::AttachmentLoadOp::CLEAR,
      store_op: vk::AttachmentStoreOp::DONT_CARE,
      stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
      stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
      initial_layout: vk::ImageLayout::UNDEFINED,
      final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
      ..Default::default()
    });
  }
  attachments
}

/// One clear value per attachment, in attachment order.
pub fn clear_values(config: &SurfaceConfig) -> Vec<vk::ClearValue> {
  let color = vk::ClearValue { color: vk::ClearColorValue { float32: CLEAR_COLOR } };
  let depth = vk::ClearValue { depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 } };
  let mut values = vec![color, depth];
  if config.is_multisampled() {
    values.push(color);
  }
  values
}

/// The two subpass dependencies order this frame's attachment writes after
/// the previous frame's, since depth and msaa images are shared by every
/// swapchain image.
pub fn create_render_pass(device: &ash::Device, config: &SurfaceConfig) -> Result<vk::RenderPass> {
  let msaa = config.is_multisampled();
  let attachments = attachment_descriptions(config);

  let color_ref = vk::AttachmentReference {
    attachment: if msaa { ATTACHMENT_MSAA } else { ATTACHMENT_PRESENT },
    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
  };
  let resolve_ref = vk::AttachmentReference {
    attachment: ATTACHMENT_PRESENT,
    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
  };
  let depth_ref = vk::AttachmentReference {
    attachment: ATTACHMENT_DEPTH,
    layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
  };
  let subpass = vk::SubpassDescription {
    pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
    color_attachment_count: 1,
    p_color_attachments: &color_ref,
    p_resolve_attachments: if msaa { &resolve_ref as *const _ } else { std::ptr::null() },
    p_depth_stencil_attachment: &depth_ref,
    ..Default::default()
  };

  let fragment_tests =
    vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
  let dependencies = [
    vk::SubpassDependency {
      src_subpass: vk::SUBPASS_EXTERNAL,
      dst_subpass: 0,
      src_stage_mask: fragment_tests,
      dst_stage_mask: fragment_tests,
      src_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
      dst_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
      dependency_flags: vk::DependencyFlags::empty(),
    },
    vk::SubpassDependency {
      src_subpass: vk::SUBPASS_EXTERNAL,
      dst_subpass: 0,
      src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
      dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
      src_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
      dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
      dependency_flags: vk::DependencyFlags::empty(),
    },
  ];

  let ci = vk::RenderPassCreateInfo {
    attachment_count: attachments.len() as u32,
    p_attachments: attachments.as_ptr(),
    subpass_count: 1,
    p_subpasses: &subpass,
    dependency_count: dependencies.len() as u32,
    p_dependencies: dependencies.as_ptr(),
    ..Default::default()
  };
  unsafe { device.create_render_pass(&ci, None).map_err(creating("render pass")) }
}

fn shader_module(device: &ash::Device, name: &'static str, bytes: &[u8]) -> Result<vk::ShaderModule> {
  let code = read_spv(&mut Cursor::new(bytes)).map_err(|source| HarnessError::Shader { name, source })?;
  let ci = vk::ShaderModuleCreateInfo {
    code_size: code.len() * 4,
    p_code: code.as_ptr(),
    ..Default::default()
  };
  unsafe { device.create_shader_module(&ci, None).map_err(creating(name)) }
}

/// Render pass, descriptor set for the projection and the gear pipeline.
/// Independent of the swapchain extent: viewport and scissor are dynamic.
pub struct GearPipeline {
  device: ash::Device,
  render_pass: vk::RenderPass,
  set_layout: vk::DescriptorSetLayout,
  desc_pool: vk::DescriptorPool,
  desc_set: vk::DescriptorSet,
  layout: vk::PipelineLayout,
  pipeline: vk::Pipeline,
}

impl GearPipeline {
  pub fn new(ctx: &DeviceContext, config: &SurfaceConfig, uniforms: &UniformBuffer) -> Result<Self> {
    let d = ctx.device();
    let mut p = GearPipeline {
      device: d.clone(),
      render_pass: vk::RenderPass::null(),
      set_layout: vk::DescriptorSetLayout::null(),
      desc_pool: vk::DescriptorPool::null(),
      desc_set: vk::DescriptorSet::null(),
      layout: vk::PipelineLayout::null(),
      pipeline: vk::Pipeline::null(),
    };
    p.render_pass = create_render_pass(d, config)?;
    p.create_descriptors(uniforms)?;
    p.create_pipeline(config)?;
    debug!("gear pipeline ready");
    Ok(p)
  }

  fn create_descriptors(&mut self, uniforms: &UniformBuffer) -> Result<()> {
    let d = &self.device;
    let binding = vk::DescriptorSetLayoutBinding {
      binding: 0,
      descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
      descriptor_count: 1,
      stage_flags: vk::ShaderStageFlags::VERTEX,
      ..Default::default()
    };
    let layout_ci = vk::DescriptorSetLayoutCreateInfo {
      binding_count: 1,
      p_bindings: &binding,
      ..Default::default()
    };
    let pool_size = vk::DescriptorPoolSize {
      ty: vk::DescriptorType::UNIFORM_BUFFER,
      descriptor_count: 1,
    };
    let pool_ci = vk::DescriptorPoolCreateInfo {
      max_sets: 1,
      pool_size_count: 1,
      p_pool_sizes: &pool_size,
      ..Default::default()
    };
    unsafe {
      self.set_layout = d
        .create_descriptor_set_layout(&layout_ci, None)
        .map_err(creating("descriptor set layout"))?;
      self.desc_pool = d.create_descriptor_pool(&pool_ci, None).map_err(creating("descriptor pool"))?;
      let alloc = vk::DescriptorSetAllocateInfo {
        descriptor_pool: self.desc_pool,
        descriptor_set_count: 1,
        p_set_layouts: &self.set_layout,
        ..Default::default()
      };
      self.desc_set = d.allocate_descriptor_sets(&alloc).map_err(creating("descriptor set"))?[0];

      let info = vk::DescriptorBufferInfo {
        buffer: uniforms.handle(),
        offset: 0,
        range: uniforms.size(),
      };
      let write = vk::WriteDescriptorSet {
        dst_set: self.desc_set,
        dst_binding: 0,
        descriptor_count: 1,
        descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
        p_buffer_info: &info,
        ..Default::default()
      };
      d.update_descriptor_sets(std::slice::from_ref(&write), &[]);
    }
    Ok(())
  }

  fn create_pipeline(&mut self, config: &SurfaceConfig) -> Result<()> {
    let d = self.device.clone();
    let push_range = vk::PushConstantRange {
      stage_flags: vk::ShaderStageFlags::VERTEX,
      offset: 0,
      size: PUSH_CONSTANTS_SIZE,
    };
    let layout_ci = vk::PipelineLayoutCreateInfo {
      set_layout_count: 1,
      p_set_layouts: &self.set_layout,
      push_constant_range_count: 1,
      p_push_constant_ranges: &push_range,
      ..Default::default()
    };
    self.layout = unsafe { d.create_pipeline_layout(&layout_ci, None).map_err(creating("pipeline layout"))? };

    let vs = shader_module(&d, "gear.vert", GEAR_VERT)?;
    let fs = match shader_module(&d, "gear.frag", GEAR_FRAG) {
      Ok(m) => m,
      Err(e) => {
        unsafe { d.destroy_shader_module(vs, None) };
        return Err(e);
      }
    };
    let entry: &CStr = c"main";
    let stages = [
      vk::PipelineShaderStageCreateInfo {
        stage: vk::ShaderStageFlags::VERTEX,
        module: vs,
        p_name: entry.as_ptr(),
        ..Default::default()
      },
      vk::PipelineShaderStageCreateInfo {
        stage: vk::ShaderStageFlags::FRAGMENT,
        module: fs,
        p_name: entry.as_ptr(),
        ..Default::default()
      },
    ];

    let binding = vk::VertexInputBindingDescription {
      binding: 0,
      stride: GEAR_VERTEX_STRIDE as u32,
      input_rate: vk::VertexInputRate::VERTEX,
    };
    let attributes = [
      vk::VertexInputAttributeDescription {
        location: 0,
        binding: 0,
        format: vk::Format::R32G32B32_SFLOAT,
        offset: 0,
      },
      vk::VertexInputAttributeDescription {
        location: 1,
        binding: 0,
        format: vk::Format::R32G32B32_SFLOAT,
        offset: std::mem::size_of::<[f32; 3]>() as u32,
      },
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
      vertex_binding_description_count: 1,
      p_vertex_binding_descriptions: &binding,
      vertex_attribute_description_count: attributes.len() as u32,
      p_vertex_attribute_descriptions: attributes.as_ptr(),
      ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
      topology: vk::PrimitiveTopology::TRIANGLE_STRIP,
      primitive_restart_enable: vk::FALSE,
      ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
      viewport_count: 1,
      scissor_count: 1,
      ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
      polygon_mode: vk::PolygonMode::FILL,
      cull_mode: vk::CullModeFlags::BACK,
      front_face: vk::FrontFace::COUNTER_CLOCKWISE,
      line_width: 1.0,
      ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
      rasterization_samples: config.samples,
      ..Default::default()
    };
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
      depth_test_enable: vk::TRUE,
      depth_write_enable: vk::TRUE,
      depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
      ..Default::default()
    };
    let blend_att = vk::PipelineColorBlendAttachmentState {
      color_write_mask: vk::ColorComponentFlags::R
        | vk::ColorComponentFlags::G
        | vk::ColorComponentFlags::B
        | vk::ColorComponentFlags::A,
      blend_enable: vk::FALSE,
      ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
      attachment_count: 1,
      p_attachments: &blend_att,
      ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
      dynamic_state_count: dyn_states.len() as u32,
      p_dynamic_states: dyn_states.as_ptr(),
      ..Default::default()
    };

    let ci = vk::GraphicsPipelineCreateInfo {
      stage_count: stages.len() as u32,
      p_stages: stages.as_ptr(),
      p_vertex_input_state: &vertex_input,
      p_input_assembly_state: &input_assembly,
      p_viewport_state: &viewport_state,
      p_rasterization_state: &raster,
      p_multisample_state: &multisample,
      p_depth_stencil_state: &depth_stencil,
      p_color_blend_state: &color_blend,
      p_dynamic_state: &dynamic_state,
      layout: self.layout,
      render_pass: self.render_pass,
      subpass: 0,
      ..Default::default()
    };
    let created = unsafe {
      d.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&ci), None)
    };
    unsafe {
      d.destroy_shader_module(vs, None);
      d.destroy_shader_module(fs, None);
    }
    let pipelines = created.map_err(|(_, e)| creating("graphics pipeline")(e))?;
    self.pipeline = pipelines[0];
    Ok(())
  }

  pub fn render_pass(&self) -> vk::RenderPass {
    self.render_pass
  }

  /// Binds the pipeline, the projection set and dynamic viewport/scissor.
  pub fn bind(&self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
    let d = &self.device;
    let viewport = vk::Viewport {
      x: 0.0,
      y: 0.0,
      width: extent.width as f32,
      height: extent.height as f32,
      min_depth: 0.0,
      max_depth: 1.0,
    };
    let scissor = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent };
    unsafe {
      d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
      d.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::GRAPHICS, self.layout, 0, &[self.desc_set], &[]);
      d.cmd_set_viewport(cmd, 0, &[viewport]);
      d.cmd_set_scissor(cmd, 0, &[scissor]);
    }
  }

  pub fn push(&self, cmd: vk::CommandBuffer, pc: &PushConstants) {
    unsafe {
      self
        .device
        .cmd_push_constants(cmd, self.layout, vk::ShaderStageFlags::VERTEX, 0, bytemuck::bytes_of(pc));
    }
  }
}

impl Drop for GearPipeline {
  fn drop(&mut self) {
    let d = &self.device;
    unsafe {
      d.destroy_pipeline(self.pipeline, None);
      d.destroy_pipeline_layout(self.layout, None);
      d.destroy_descriptor_pool(self.desc_pool, None);
      d.destroy_descriptor_set_layout(self.set_layout, None);
      d.destroy_render_pass(self.render_pass, None);
    }
    debug!("gear pipeline destroyed");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn push_constants_are_76_bytes() {
    assert_eq!(PUSH_CONSTANTS_SIZE, 76);
    assert!(PUSH_CONSTANTS_SIZE <= 128, "minimum guaranteed push constant space");
  }

  #[test]
  fn push_constants_are_column_major() {
    let m = Mat4::from_translation(gearmark_math::Vec3::new(1.0, 2.0, 3.0));
    let pc = PushConstants::new(m, [0.5, 0.25, 1.0]);
    assert_eq!(pc.modelview[3], [1.0, 2.0, 3.0, 1.0]);
    let bytes = bytemuck::bytes_of(&pc);
    assert_eq!(&bytes[64..68], &0.5f32.to_ne_bytes());
  }

  fn config(samples: vk::SampleCountFlags) -> SurfaceConfig {
    SurfaceConfig {
      surface_format: vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
      },
      present_mode: vk::PresentModeKHR::FIFO,
      depth_format: vk::Format::D32_SFLOAT,
      samples,
    }
  }

  #[test]
  fn every_attachment_gets_a_clear_value() {
    for samples in [vk::SampleCountFlags::TYPE_1, vk::SampleCountFlags::TYPE_4] {
      let cfg = config(samples);
      assert_eq!(attachment_descriptions(&cfg).len(), clear_values(&cfg).len());
    }
    assert_eq!(attachment_descriptions(&config(vk::SampleCountFlags::TYPE_1)).len(), 2);
    assert_eq!(attachment_descriptions(&config(vk::SampleCountFlags::TYPE_4)).len(), 3);
  }

  #[test]
  fn attachment_set_is_stable_across_rebuilds() {
    let cfg = config(vk::SampleCountFlags::TYPE_4);
    let key = |a: &vk::AttachmentDescription| (a.format, a.samples, a.load_op, a.store_op, a.final_layout);
    let first: Vec<_> = attachment_descriptions(&cfg).iter().map(key).collect();
    let second: Vec<_> = attachment_descriptions(&cfg).iter().map(key).collect();
    assert_eq!(first, second);
    assert_eq!(first[ATTACHMENT_PRESENT as usize].1, vk::SampleCountFlags::TYPE_1);
    assert_eq!(first[ATTACHMENT_DEPTH as usize].0, vk::Format::D32_SFLOAT);
    assert_eq!(first[ATTACHMENT_MSAA as usize].1, vk::SampleCountFlags::TYPE_4);
  }

  #[test]
  fn depth_clears_to_far_plane() {
    let values = clear_values(&config(vk::SampleCountFlags::TYPE_1));
    let depth = unsafe { values[ATTACHMENT_DEPTH as usize].depth_stencil };
    assert_eq!(depth.depth, 1.0);
  }

  #[test]
  fn embedded_shaders_are_spirv() {
    for bytes in [GEAR_VERT, GEAR_FRAG] {
      let words = read_spv(&mut Cursor::new(bytes)).unwrap();
      assert_eq!(words[0], 0x0723_0203);
    }
  }
}
