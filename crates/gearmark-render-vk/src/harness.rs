// SPDX-License-Identifier: CEPL-1.0
//! The benchmark context and its render loop.
//!
//! `run` loops through acquire, record, submit and present until the
//! sampling window closes, then reports. Staleness and expired waits
//! rebuild the swapchain and restart the window; anything else is fatal.

use std::time::{Duration, Instant};

use ash::vk;
use gearmark_core::FrameClock;
use gearmark_math::{view_matrix, GearSet, Mat4};
use gearmark_platform::{Wsi, WsiCallbacks, WsiError, WsiKey};
use gearmark_render::animation::VIEW_STEP_DEG;
use gearmark_render::{
  Animation, BenchmarkResult, FpsMeter, FramesInFlight, PresentPreference, RenderSize, SampleCount,
  DEFAULT_SAMPLING_WINDOW,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info, warn};

use crate::device::{DeviceContext, DeviceOptions};
use crate::error::{HarnessError, Result};
use crate::frame::{timeout_ns, FrameRing};
use crate::pipeline::{clear_values, GearPipeline, PushConstants};
use crate::swapchain::{SurfaceConfig, Swapchain};
use crate::upload::{create_uniform_buffer, upload_mesh, UniformBuffer, VertexBuffer};

pub const WINDOW_TITLE: &str = "Vulkan Benchmark";

/// Expired waits in a row before the GPU is considered hung.
const MAX_CONSECUTIVE_TIMEOUTS: u32 = 5;
/// Poll interval while the window has no drawable area.
const MINIMIZED_POLL: Duration = Duration::from_millis(10);

#[derive(Clone, Debug)]
pub struct HarnessOptions {
  pub size: RenderSize,
  pub fullscreen: bool,
  pub samples: SampleCount,
  pub present: PresentPreference,
  pub frames_in_flight: FramesInFlight,
  pub device_index: Option<usize>,
  pub sampling_window: Duration,
  pub wait_timeout: Duration,
  pub animate: bool,
  pub validation: bool,
}

impl Default for HarnessOptions {
  fn default() -> Self {
    Self {
      size: gearmark_render::options::DEFAULT_SIZE,
      fullscreen: false,
      samples: SampleCount::default(),
      present: PresentPreference::default(),
      frames_in_flight: FramesInFlight::default(),
      device_index: None,
      sampling_window: DEFAULT_SAMPLING_WINDOW,
      wait_timeout: Duration::from_millis(1000),
      animate: true,
      validation: cfg!(debug_assertions),
    }
  }
}

/// Collects window events between two frames.
#[derive(Debug)]
pub struct LoopInput {
  pub animation: Animation,
  pub resize: Option<RenderSize>,
  pub exit: bool,
}

impl LoopInput {
  pub fn new(animate: bool) -> Self {
    Self {
      animation: Animation::new(animate),
      resize: None,
      exit: false,
    }
  }
}

impl WsiCallbacks for LoopInput {
  fn on_resize(&mut self, width: u32, height: u32) {
    self.resize = Some(RenderSize::new(width, height));
  }

  fn on_exit(&mut self) {
    self.exit = true;
  }

  fn on_key(&mut self, key: WsiKey) {
    match key {
      WsiKey::Escape => self.exit = true,
      WsiKey::Up => self.animation.rotate_view(VIEW_STEP_DEG, 0.0),
      WsiKey::Down => self.animation.rotate_view(-VIEW_STEP_DEG, 0.0),
      WsiKey::Left => self.animation.rotate_view(0.0, VIEW_STEP_DEG),
      WsiKey::Right => self.animation.rotate_view(0.0, -VIEW_STEP_DEG),
      WsiKey::A => self.animation.toggle(),
    }
  }
}

/// Consecutive expired waits with no frame presented in between.
#[derive(Clone, Copy, Debug, Default)]
struct TimeoutBudget {
  expired: u32,
}

impl TimeoutBudget {
  /// True when the loop may rebuild and retry after `e`. Staleness is free;
  /// expired waits are counted and the last allowed one is fatal.
  fn absorb(&mut self, e: &HarnessError) -> bool {
    match e {
      HarnessError::Timeout { .. } => {
        self.expired += 1;
        self.expired < MAX_CONSECUTIVE_TIMEOUTS
      }
      e => e.is_recoverable(),
    }
  }

  fn reset(&mut self) {
    self.expired = 0;
  }
}

/// Opens the device for the window `wsi` currently holds.
pub fn open_device(wsi: &Wsi, opts: &HarnessOptions) -> Result<DeviceContext> {
  let window = wsi.window().ok_or(HarnessError::Wsi(WsiError::NoWindow))?;
  let display = window.display_handle()?.as_raw();
  let handle = window.window_handle()?.as_raw();
  DeviceContext::new(
    display,
    handle,
    &DeviceOptions {
      device_index: opts.device_index,
      validation: opts.validation,
    },
  )
}

/// Owns every GPU object of the benchmark. Fields drop top to bottom, so
/// the declaration order is the teardown order and the device goes last.
pub struct GearsHarness {
  frames: FrameRing,
  swapchain: Swapchain,
  pipeline: GearPipeline,
  uniforms: UniformBuffer,
  vertices: VertexBuffer,
  ctx: DeviceContext,

  config: SurfaceConfig,
  input: LoopInput,
  meter: FpsMeter,
  clock: FrameClock,
  projection: Option<(f32, Mat4)>,
  target: RenderSize,
  needs_recreate: bool,
  suboptimal_accepted: bool,
  budget: TimeoutBudget,
  recreations: u64,
}

impl GearsHarness {
  pub fn new(wsi: &Wsi, opts: &HarnessOptions) -> Result<Self> {
    let ctx = open_device(wsi, opts)?;
    ctx.check_sample_count(opts.samples)?;
    Self::with_device(ctx, wsi, opts)
  }

  pub fn with_device(ctx: DeviceContext, wsi: &Wsi, opts: &HarnessOptions) -> Result<Self> {
    let config = SurfaceConfig::configure(&ctx, opts.present, opts.samples)?;
    let vertices = upload_mesh(&ctx, &GearSet::standard())?;
    let uniforms = create_uniform_buffer(&ctx)?;
    let pipeline = GearPipeline::new(&ctx, &config, &uniforms)?;

    let target = wsi
      .inner_size()
      .map(|(w, h)| RenderSize::new(w, h))
      .filter(|s| !s.is_empty())
      .unwrap_or(opts.size);
    let swapchain = Swapchain::create(&ctx, &config, pipeline.render_pass(), target)?;
    let frames = FrameRing::new(&ctx, opts.frames_in_flight, opts.wait_timeout)?;

    Ok(Self {
      frames,
      swapchain,
      pipeline,
      uniforms,
      vertices,
      ctx,
      config,
      input: LoopInput::new(opts.animate),
      meter: FpsMeter::new(opts.sampling_window),
      clock: FrameClock::new(),
      projection: None,
      target,
      needs_recreate: false,
      suboptimal_accepted: false,
      budget: TimeoutBudget::default(),
      recreations: 0,
    })
  }

  pub fn device(&self) -> &DeviceContext {
    &self.ctx
  }

  /// Swapchain rebuilds so far. Each one restarted the sampling window.
  pub fn recreations(&self) -> u64 {
    self.recreations
  }

  /// Size of the images currently being presented.
  pub fn render_size(&self) -> RenderSize {
    self.swapchain.size()
  }

  /// Renders until the sampling window closes. `None` when the window was
  /// closed first.
  pub fn run(&mut self, wsi: &mut Wsi) -> Result<Option<BenchmarkResult>> {
    self.meter.restart();
    self.input.exit = false;
    info!(
      "sampling {:?} with {} frame(s) in flight",
      self.meter.window(),
      self.frames.len()
    );
    loop {
      let (now, dt) = self.clock.tick();
      self.input.animation.advance(dt);

      if !wsi.update_window(&mut self.input) || self.input.exit {
        info!("exit requested after {} frame(s)", self.meter.frames());
        return Ok(None);
      }
      if let Some(size) = self.input.resize.take() {
        if size != self.target {
          debug!("resize to {size}");
          self.target = size;
          self.needs_recreate = true;
        }
      }

      if self.needs_recreate {
        if self.target.is_empty() {
          std::thread::sleep(MINIMIZED_POLL);
          continue;
        }
        if let Err(e) = self.recreate() {
          if !self.budget.absorb(&e) {
            return Err(e);
          }
          warn!("swapchain not rebuilt: {e}");
          std::thread::sleep(MINIMIZED_POLL);
        }
        continue;
      }

      match self.draw_frame(now) {
        Ok(Some(fps)) => {
          let result = BenchmarkResult::new(fps);
          info!("{} frame(s) in {:?}: {fps:.3} fps", self.meter.frames(), self.meter.window());
          return Ok(Some(result));
        }
        Ok(None) => self.budget.reset(),
        Err(e) => {
          if !self.budget.absorb(&e) {
            return Err(e);
          }
          match e {
            HarnessError::OutOfDate => debug!("swapchain stale"),
            e => warn!("{e}; recreating swapchain"),
          }
          self.needs_recreate = true;
        }
      }
    }
  }

  /// One pass through acquire, record, submit and present. Returns the
  /// measured rate once the sampling window has elapsed.
  fn draw_frame(&mut self, now: Instant) -> Result<Option<f64>> {
    self.frames.wait_current()?;

    let timeout = self.frames.timeout();
    let (index, suboptimal) = unsafe {
      self.swapchain.loader().acquire_next_image(
        self.swapchain.handle(),
        timeout_ns(timeout),
        self.frames.image_acquired(),
        vk::Fence::null(),
      )
    }
    .map_err(|r| HarnessError::from_wait("image acquire", timeout, r))?;
    if suboptimal && !self.accept_suboptimal()? {
      return Err(HarnessError::OutOfDate);
    }

    let cmd = self.frames.begin()?;
    self.record(cmd, index);

    let render_finished = self.swapchain.present_semaphore(index);
    self.frames.submit(self.ctx.queue(), render_finished)?;

    let swapchain = self.swapchain.handle();
    let present = vk::PresentInfoKHR {
      wait_semaphore_count: 1,
      p_wait_semaphores: &render_finished,
      swapchain_count: 1,
      p_swapchains: &swapchain,
      p_image_indices: &index,
      ..Default::default()
    };
    match unsafe { self.swapchain.loader().queue_present(self.ctx.queue(), &present) } {
      Ok(false) => {}
      // Presented, so it counts; rebuild before the next frame.
      Ok(true) => self.needs_recreate = !self.accept_suboptimal()?,
      Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Err(HarnessError::OutOfDate),
      Err(e) => return Err(e.into()),
    }

    Ok(self.meter.record_frame(now))
  }

  /// A surface may keep reporting suboptimal for a chain that already
  /// matches its capabilities. Such a chain is kept for the rest of its life.
  fn accept_suboptimal(&mut self) -> Result<bool> {
    if !self.suboptimal_accepted && self.swapchain.matches_surface(&self.ctx)? {
      warn!("surface stays suboptimal at {}; keeping the swapchain", self.swapchain.size());
      self.suboptimal_accepted = true;
    }
    Ok(self.suboptimal_accepted)
  }

  /// Projection for the current extent, rebuilt only when the aspect changes.
  fn projection(&mut self, extent: vk::Extent2D) -> Mat4 {
    let aspect = extent.height as f32 / extent.width.max(1) as f32;
    match self.projection {
      Some((a, m)) if a == aspect => m,
      _ => {
        let m = gearmark_math::projection_for(extent.width, extent.height);
        self.projection = Some((aspect, m));
        m
      }
    }
  }

  fn record(&mut self, cmd: vk::CommandBuffer, image_index: u32) {
    let extent = self.swapchain.extent();
    let projection = self.projection(extent);
    let d = self.ctx.device();

    self.uniforms.record_update(d, cmd, &projection);

    let clears = clear_values(&self.config);
    let rp_begin = vk::RenderPassBeginInfo {
      render_pass: self.pipeline.render_pass(),
      framebuffer: self.swapchain.framebuffer(image_index),
      render_area: vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent },
      clear_value_count: clears.len() as u32,
      p_clear_values: clears.as_ptr(),
      ..Default::default()
    };

    let view = view_matrix(self.input.animation.view_rot());
    unsafe {
      d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
      self.pipeline.bind(cmd, extent);
      d.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.handle()], &[0]);
      for (pose, range) in self.input.animation.poses().iter().zip(self.vertices.ranges()) {
        self.pipeline.push(cmd, &PushConstants::new(pose.model_view(view), pose.color));
        d.cmd_draw(cmd, range.vertex_count, 1, range.first_vertex, 0);
      }
      d.cmd_end_render_pass(cmd);
    }
  }

  /// Drains the ring, rebuilds the swapchain for `target` and restarts the
  /// sampling window. Every submit signals a slot fence, so a drained ring
  /// means the old images are no longer in use. A drain that times out
  /// leaves the swapchain untouched.
  fn recreate(&mut self) -> Result<()> {
    self.frames.wait_all()?;

    self
      .swapchain
      .recreate(&self.ctx, &self.config, self.pipeline.render_pass(), self.target)?;
    self.frames.recycle_acquire_semaphores()?;
    self.meter.restart();
    self.projection = None;
    self.needs_recreate = false;
    self.suboptimal_accepted = false;
    self.recreations += 1;
    self.target = self.swapchain.size();
    info!("swapchain recreated at {}", self.target);
    Ok(())
  }
}

impl Drop for GearsHarness {
  fn drop(&mut self) {
    // Submitted frames still reference everything below; let them finish.
    unsafe {
      let _ = self.ctx.device().device_wait_idle();
    }
    debug!("benchmark context torn down");
  }
}
