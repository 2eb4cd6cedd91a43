// SPDX-License-Identifier: CEPL-1.0
//! Presentation chain plus the attachments that share its extent.

use ash::khr::swapchain;
use ash::vk;
use gearmark_render::{PresentPreference, RenderSize, SampleCount};
use tracing::{debug, info};

use crate::device::DeviceContext;
use crate::error::{creating, HarnessError, Result};

/// `max(min, 2)`, clamped to the surface maximum when it has one.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
  let count = caps.min_image_count.max(2);
  if caps.max_image_count > 0 {
    count.min(caps.max_image_count)
  } else {
    count
  }
}

pub fn present_mode_for(pref: PresentPreference) -> vk::PresentModeKHR {
  match pref {
    PresentPreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    PresentPreference::Mailbox => vk::PresentModeKHR::MAILBOX,
    PresentPreference::Fifo => vk::PresentModeKHR::FIFO,
  }
}

/// Requested mode when the surface offers it, FIFO otherwise.
pub fn choose_present_mode(available: &[vk::PresentModeKHR], pref: PresentPreference) -> vk::PresentModeKHR {
  let want = present_mode_for(pref);
  if available.contains(&want) {
    want
  } else {
    vk::PresentModeKHR::FIFO
  }
}

/// 8-bit sRGB BGRA or RGBA, else whatever the surface lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
  const PREFERRED: [vk::Format; 2] = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];
  PREFERRED
    .iter()
    .find_map(|&fmt| {
      formats
        .iter()
        .copied()
        .find(|f| f.format == fmt && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
    })
    .or_else(|| formats.first().copied())
}

pub fn choose_depth_format(supports_depth: impl Fn(vk::Format) -> bool) -> vk::Format {
  if supports_depth(vk::Format::D32_SFLOAT) {
    vk::Format::D32_SFLOAT
  } else {
    vk::Format::X8_D24_UNORM_PACK32
  }
}

pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
  [
    vk::CompositeAlphaFlagsKHR::OPAQUE,
    vk::CompositeAlphaFlagsKHR::INHERIT,
    vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
    vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
  ]
  .into_iter()
  .find(|&a| supported.contains(a))
  .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Surface-dictated extent when there is one, else `want` clamped to the limits.
pub fn extent_for(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
  if caps.current_extent.width != u32::MAX {
    caps.current_extent
  } else {
    vk::Extent2D {
      width: want.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
      height: want.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
  }
}

pub fn sample_flags(samples: SampleCount) -> vk::SampleCountFlags {
  vk::SampleCountFlags::from_raw(samples.get())
}

/// Everything about a swapchain that depends on the current capabilities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainPlan {
  pub image_count: u32,
  pub extent: vk::Extent2D,
  pub pre_transform: vk::SurfaceTransformFlagsKHR,
  pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

pub fn plan_swapchain(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> SwapchainPlan {
  SwapchainPlan {
    image_count: choose_image_count(caps),
    extent: extent_for(caps, want),
    pre_transform: caps.current_transform,
    composite_alpha: choose_composite_alpha(caps.supported_composite_alpha),
  }
}

/// Whether rebuilding for `caps` would produce `current` again.
pub fn plan_is_current(current: &SwapchainPlan, caps: &vk::SurfaceCapabilitiesKHR) -> bool {
  let want = RenderSize::new(current.extent.width, current.extent.height);
  plan_swapchain(caps, want) == *current
}

/// Choices made once per surface; they outlive every swapchain built on it.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceConfig {
  pub surface_format: vk::SurfaceFormatKHR,
  pub present_mode: vk::PresentModeKHR,
  pub depth_format: vk::Format,
  pub samples: vk::SampleCountFlags,
}

impl SurfaceConfig {
  pub fn configure(ctx: &DeviceContext, pref: PresentPreference, samples: SampleCount) -> Result<Self> {
    let loader = ctx.surface_loader();
    let (formats, modes) = unsafe {
      (
        loader.get_physical_device_surface_formats(ctx.physical_device(), ctx.surface())?,
        loader.get_physical_device_surface_present_modes(ctx.physical_device(), ctx.surface())?,
      )
    };
    let surface_format = choose_surface_format(&formats)
      .ok_or_else(|| HarnessError::SurfaceUnsupported("surface reports no formats".into()))?;
    let present_mode = choose_present_mode(&modes, pref);
    let depth_format =
      choose_depth_format(|f| ctx.format_supports(f, vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT));

    let cfg = Self {
      surface_format,
      present_mode,
      depth_format,
      samples: sample_flags(samples),
    };
    info!(
      "surface: {:?}/{:?}, present {:?}, depth {:?}, {} sample(s)",
      cfg.surface_format.format,
      cfg.surface_format.color_space,
      cfg.present_mode,
      cfg.depth_format,
      samples
    );
    Ok(cfg)
  }

  pub fn is_multisampled(&self) -> bool {
    self.samples != vk::SampleCountFlags::TYPE_1
  }
}

/// An image with its own memory and a single view.
struct Attachment {
  image: vk::Image,
  memory: vk::DeviceMemory,
  view: vk::ImageView,
}

impl Attachment {
  fn new(
    ctx: &DeviceContext,
    format: vk::Format,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    usage: vk::ImageUsageFlags,
    aspect: vk::ImageAspectFlags,
    what: &'static str,
  ) -> Result<Self> {
    let d = ctx.device();
    let ci = vk::ImageCreateInfo {
      image_type: vk::ImageType::TYPE_2D,
      format,
      extent: vk::Extent3D { width: extent.width, height: extent.height, depth: 1 },
      mip_levels: 1,
      array_layers: 1,
      samples,
      tiling: vk::ImageTiling::OPTIMAL,
      usage: usage | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
      sharing_mode: vk::SharingMode::EXCLUSIVE,
      initial_layout: vk::ImageLayout::UNDEFINED,
      ..Default::default()
    };
    unsafe {
      let image = d.create_image(&ci, None).map_err(creating(what))?;
      let mut att = Attachment { image, memory: vk::DeviceMemory::null(), view: vk::ImageView::null() };

      let req = d.get_image_memory_requirements(image);
      let mem_type = match ctx.find_memory_type(
        req.memory_type_bits,
        vk::MemoryPropertyFlags::LAZILY_ALLOCATED,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        what,
      ) {
        Ok(t) => t,
        Err(e) => {
          att.destroy(d);
          return Err(e);
        }
      };
      let alloc = vk::MemoryAllocateInfo {
        allocation_size: req.size,
        memory_type_index: mem_type,
        ..Default::default()
      };
      let bound = d.allocate_memory(&alloc, None).and_then(|mem| {
        att.memory = mem;
        d.bind_image_memory(image, mem, 0)
      });
      if let Err(e) = bound {
        att.destroy(d);
        return Err(creating(what)(e));
      }

      let view_ci = vk::ImageViewCreateInfo {
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: vk::ImageSubresourceRange {
          aspect_mask: aspect,
          base_mip_level: 0,
          level_count: 1,
          base_array_layer: 0,
          layer_count: 1,
        },
        ..Default::default()
      };
      match d.create_image_view(&view_ci, None) {
        Ok(v) => att.view = v,
        Err(e) => {
          att.destroy(d);
          return Err(creating(what)(e));
        }
      }
      Ok(att)
    }
  }

  /// View first, then image, then memory.
  unsafe fn destroy(&self, device: &ash::Device) {
    device.destroy_image_view(self.view, None);
    device.destroy_image(self.image, None);
    device.free_memory(self.memory, None);
  }
}

/// Swapchain images with their views, framebuffers and the shared depth
/// and multisample targets. One present semaphore per image.
pub struct Swapchain {
  device: ash::Device,
  loader: swapchain::Device,
  handle: vk::SwapchainKHR,
  plan: SwapchainPlan,
  images: Vec<vk::Image>,
  views: Vec<vk::ImageView>,
  depth: Option<Attachment>,
  msaa: Option<Attachment>,
  framebuffers: Vec<vk::Framebuffer>,
  present_semaphores: Vec<vk::Semaphore>,
}

impl Swapchain {
  pub fn create(
    ctx: &DeviceContext,
    config: &SurfaceConfig,
    render_pass: vk::RenderPass,
    want: RenderSize,
  ) -> Result<Self> {
    let caps = unsafe {
      ctx
        .surface_loader()
        .get_physical_device_surface_capabilities(ctx.physical_device(), ctx.surface())?
    };
    let plan = plan_swapchain(&caps, want);
    if plan.extent.width == 0 || plan.extent.height == 0 {
      return Err(HarnessError::OutOfDate);
    }

    let loader = ctx.swapchain_loader();
    let ci = vk::SwapchainCreateInfoKHR {
      surface: ctx.surface(),
      min_image_count: plan.image_count,
      image_format: config.surface_format.format,
      image_color_space: config.surface_format.color_space,
      image_extent: plan.extent,
      image_array_layers: 1,
      image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
      image_sharing_mode: vk::SharingMode::EXCLUSIVE,
      pre_transform: plan.pre_transform,
      composite_alpha: plan.composite_alpha,
      present_mode: config.present_mode,
      clipped: vk::TRUE,
      ..Default::default()
    };
    let handle = unsafe { loader.create_swapchain(&ci, None).map_err(creating("swapchain"))? };

    let mut sc = Swapchain {
      device: ctx.device().clone(),
      loader,
      handle,
      plan,
      images: Vec::new(),
      views: Vec::new(),
      depth: None,
      msaa: None,
      framebuffers: Vec::new(),
      present_semaphores: Vec::new(),
    };
    // From here on a failure drops `sc`, which releases whatever was built.
    sc.build_children(ctx, config, render_pass)?;

    info!(
      "swapchain ready: {}x{}, {} images",
      sc.plan.extent.width,
      sc.plan.extent.height,
      sc.images.len()
    );
    Ok(sc)
  }

  fn build_children(&mut self, ctx: &DeviceContext, config: &SurfaceConfig, render_pass: vk::RenderPass) -> Result<()> {
    let d = ctx.device();
    let extent = self.plan.extent;
    unsafe {
      self.images = self.loader.get_swapchain_images(self.handle)?;

      for &image in &self.images {
        let ci = vk::ImageViewCreateInfo {
          image,
          view_type: vk::ImageViewType::TYPE_2D,
          format: config.surface_format.format,
          subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
          },
          ..Default::default()
        };
        self.views.push(d.create_image_view(&ci, None).map_err(creating("swapchain image view"))?);
      }

      self.depth = Some(Attachment::new(
        ctx,
        config.depth_format,
        extent,
        config.samples,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        vk::ImageAspectFlags::DEPTH,
        "depth attachment",
      )?);
      if config.is_multisampled() {
        self.msaa = Some(Attachment::new(
          ctx,
          config.surface_format.format,
          extent,
          config.samples,
          vk::ImageUsageFlags::COLOR_ATTACHMENT,
          vk::ImageAspectFlags::COLOR,
          "multisample attachment",
        )?);
      }

      let depth_view = self.depth.as_ref().map(|a| a.view).unwrap_or_default();
      let msaa_view = self.msaa.as_ref().map(|a| a.view);
      for &view in &self.views {
        // Attachment order matches the render pass: resolve/present, depth, msaa.
        let mut attachments = vec![view, depth_view];
        attachments.extend(msaa_view);
        let ci = vk::FramebufferCreateInfo {
          render_pass,
          attachment_count: attachments.len() as u32,
          p_attachments: attachments.as_ptr(),
          width: extent.width,
          height: extent.height,
          layers: 1,
          ..Default::default()
        };
        self.framebuffers.push(d.create_framebuffer(&ci, None).map_err(creating("framebuffer"))?);
      }

      let sem_ci = vk::SemaphoreCreateInfo::default();
      for _ in &self.images {
        self
          .present_semaphores
          .push(d.create_semaphore(&sem_ci, None).map_err(creating("present semaphore"))?);
      }
    }
    Ok(())
  }

  /// Tears the chain down and builds a new one for `want`.
  ///
  /// The caller must have waited for every frame that used the old images.
  pub fn recreate(
    &mut self,
    ctx: &DeviceContext,
    config: &SurfaceConfig,
    render_pass: vk::RenderPass,
    want: RenderSize,
  ) -> Result<()> {
    unsafe { self.release() };
    *self = Self::create(ctx, config, render_pass, want)?;
    Ok(())
  }

  /// Children depth-first, then the swapchain itself. Leaves `self` empty.
  unsafe fn release(&mut self) {
    let d = &self.device;
    for fb in self.framebuffers.drain(..) {
      d.destroy_framebuffer(fb, None);
    }
    for view in self.views.drain(..) {
      d.destroy_image_view(view, None);
    }
    if let Some(msaa) = self.msaa.take() {
      msaa.destroy(d);
    }
    if let Some(depth) = self.depth.take() {
      depth.destroy(d);
    }
    for sem in self.present_semaphores.drain(..) {
      d.destroy_semaphore(sem, None);
    }
    self.images.clear();
    if self.handle != vk::SwapchainKHR::null() {
      self.loader.destroy_swapchain(self.handle, None);
      self.handle = vk::SwapchainKHR::null();
      debug!("swapchain destroyed");
    }
  }

  pub fn handle(&self) -> vk::SwapchainKHR {
    self.handle
  }

  pub fn loader(&self) -> &swapchain::Device {
    &self.loader
  }

  pub fn extent(&self) -> vk::Extent2D {
    self.plan.extent
  }

  pub fn size(&self) -> RenderSize {
    RenderSize::new(self.plan.extent.width, self.plan.extent.height)
  }

  /// Queries the surface again and compares against the plan in use.
  pub fn matches_surface(&self, ctx: &DeviceContext) -> Result<bool> {
    let caps = unsafe {
      ctx
        .surface_loader()
        .get_physical_device_surface_capabilities(ctx.physical_device(), ctx.surface())?
    };
    Ok(plan_is_current(&self.plan, &caps))
  }

  pub fn framebuffer(&self, image_index: u32) -> vk::Framebuffer {
    self.framebuffers[image_index as usize]
  }

  pub fn present_semaphore(&self, image_index: u32) -> vk::Semaphore {
    self.present_semaphores[image_index as usize]
  }
}

impl Drop for Swapchain {
  fn drop(&mut self) {
    unsafe { self.release() };
  }
}
