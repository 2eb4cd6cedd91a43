// SPDX-License-Identifier: CEPL-1.0
//! Frames in flight: a small ring of command buffers, each guarded by a
//! fence, plus one image-acquired semaphore per slot.
//!
//! Slot count and swapchain image count are unrelated; the ring advances
//! after every submit no matter which image was acquired.

use std::fmt;
use std::time::Duration;

use ash::vk;
use gearmark_render::FramesInFlight;
use thiserror::Error;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{creating, HarnessError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
  /// Fence signalled; the GPU is done with this slot.
  Idle,
  Recording,
  /// Fence unsignalled until the GPU finishes.
  Submitted,
}

impl fmt::Display for SlotState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SlotState::Idle => "idle",
      SlotState::Recording => "recording",
      SlotState::Submitted => "submitted",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("frame slot {slot}: cannot {action} while {state}")]
pub struct SlotTransitionError {
  pub slot: usize,
  pub action: &'static str,
  pub state: SlotState,
}

/// CPU-side view of the ring, kept in step with the fences.
#[derive(Clone, Debug)]
pub struct SlotTracker {
  states: Vec<SlotState>,
  current: usize,
}

impl SlotTracker {
  pub fn new(count: usize) -> Self {
    Self {
      states: vec![SlotState::Idle; count.max(1)],
      current: 0,
    }
  }

  pub fn len(&self) -> usize {
    self.states.len()
  }

  pub fn current(&self) -> usize {
    self.current
  }

  pub fn state(&self, slot: usize) -> SlotState {
    self.states[slot]
  }

  /// Slots whose fence is still pending.
  pub fn outstanding(&self) -> usize {
    self.states.iter().filter(|&&s| s == SlotState::Submitted).count()
  }

  fn transition(&mut self, action: &'static str, from: &[SlotState], to: SlotState) -> Result<(), SlotTransitionError> {
    let slot = self.current;
    let state = self.states[slot];
    if !from.contains(&state) {
      return Err(SlotTransitionError { slot, action, state });
    }
    self.states[slot] = to;
    Ok(())
  }

  /// The current slot's fence was observed signalled.
  pub fn complete(&mut self) -> Result<(), SlotTransitionError> {
    self.transition("complete", &[SlotState::Idle, SlotState::Submitted], SlotState::Idle)
  }

  pub fn begin(&mut self) -> Result<(), SlotTransitionError> {
    self.transition("begin recording", &[SlotState::Idle], SlotState::Recording)
  }

  /// Marks the current slot submitted and moves to the next one.
  pub fn submit(&mut self) -> Result<(), SlotTransitionError> {
    self.transition("submit", &[SlotState::Recording], SlotState::Submitted)?;
    self.current = (self.current + 1) % self.states.len();
    Ok(())
  }

  /// Every fence observed signalled.
  pub fn complete_all(&mut self) {
    for s in &mut self.states {
      if *s == SlotState::Submitted {
        *s = SlotState::Idle;
      }
    }
  }
}

struct FrameSlot {
  cmd: vk::CommandBuffer,
  fence: vk::Fence,
  image_acquired: vk::Semaphore,
}

pub(crate) fn timeout_ns(d: Duration) -> u64 {
  u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

pub struct FrameRing {
  device: ash::Device,
  pool: vk::CommandPool,
  slots: Vec<FrameSlot>,
  tracker: SlotTracker,
  timeout: Duration,
}

impl FrameRing {
  pub fn new(ctx: &DeviceContext, count: FramesInFlight, timeout: Duration) -> Result<Self> {
    let d = ctx.device();
    let mut ring = FrameRing {
      device: d.clone(),
      pool: ctx.command_pool(),
      slots: Vec::with_capacity(count.get()),
      tracker: SlotTracker::new(count.get()),
      timeout,
    };

    let alloc_info = vk::CommandBufferAllocateInfo {
      command_pool: ctx.command_pool(),
      level: vk::CommandBufferLevel::PRIMARY,
      command_buffer_count: count.get() as u32,
      ..Default::default()
    };
    let fence_ci = vk::FenceCreateInfo {
      flags: vk::FenceCreateFlags::SIGNALED,
      ..Default::default()
    };
    let sem_ci = vk::SemaphoreCreateInfo::default();

    unsafe {
      let cmds = d.allocate_command_buffers(&alloc_info).map_err(creating("command buffers"))?;
      for (i, cmd) in cmds.into_iter().enumerate() {
        // Pushed before the fallible calls so Drop frees the buffer either way.
        ring.slots.push(FrameSlot {
          cmd,
          fence: vk::Fence::null(),
          image_acquired: vk::Semaphore::null(),
        });
        let slot = &mut ring.slots[i];
        slot.fence = d.create_fence(&fence_ci, None).map_err(creating("frame fence"))?;
        slot.image_acquired = d.create_semaphore(&sem_ci, None).map_err(creating("acquire semaphore"))?;
      }
    }
    debug!("frame ring: {} slot(s), wait timeout {:?}", ring.slots.len(), timeout);
    Ok(ring)
  }

  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn outstanding(&self) -> usize {
    self.tracker.outstanding()
  }

  pub fn timeout(&self) -> Duration {
    self.timeout
  }

  /// Semaphore the next acquire should signal.
  pub fn image_acquired(&self) -> vk::Semaphore {
    self.slots[self.tracker.current()].image_acquired
  }

  /// Blocks until the GPU has finished with the current slot.
  pub fn wait_current(&mut self) -> Result<()> {
    let fence = self.slots[self.tracker.current()].fence;
    unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns(self.timeout)) }
      .map_err(|r| HarnessError::from_wait("frame fence wait", self.timeout, r))?;
    self.tracker.complete()?;
    Ok(())
  }

  /// Resets the current slot's fence and starts recording into its buffer.
  pub fn begin(&mut self) -> Result<vk::CommandBuffer> {
    self.tracker.begin()?;
    let slot = &self.slots[self.tracker.current()];
    let begin = vk::CommandBufferBeginInfo {
      flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
      ..Default::default()
    };
    unsafe {
      self.device.reset_fences(&[slot.fence])?;
      self
        .device
        .reset_command_buffer(slot.cmd, vk::CommandBufferResetFlags::empty())?;
      self.device.begin_command_buffer(slot.cmd, &begin)?;
    }
    Ok(slot.cmd)
  }

  /// Ends recording and submits: waits on the slot's acquire semaphore at
  /// colour output, signals `render_finished` and the slot fence.
  pub fn submit(&mut self, queue: vk::Queue, render_finished: vk::Semaphore) -> Result<()> {
    let slot = &self.slots[self.tracker.current()];
    let wait_stage = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    let submit = vk::SubmitInfo {
      wait_semaphore_count: 1,
      p_wait_semaphores: &slot.image_acquired,
      p_wait_dst_stage_mask: &wait_stage,
      command_buffer_count: 1,
      p_command_buffers: &slot.cmd,
      signal_semaphore_count: 1,
      p_signal_semaphores: &render_finished,
      ..Default::default()
    };
    unsafe {
      self.device.end_command_buffer(slot.cmd)?;
      self
        .device
        .queue_submit(queue, std::slice::from_ref(&submit), slot.fence)?;
    }
    self.tracker.submit()?;
    debug_assert!(self.outstanding() <= self.len());
    Ok(())
  }

  /// Waits for every slot; used before the swapchain is torn down.
  pub fn wait_all(&mut self) -> Result<()> {
    let fences: Vec<vk::Fence> = self.slots.iter().map(|s| s.fence).collect();
    unsafe { self.device.wait_for_fences(&fences, true, timeout_ns(self.timeout)) }
      .map_err(|r| HarnessError::from_wait("frame ring drain", self.timeout, r))?;
    self.tracker.complete_all();
    Ok(())
  }

  /// Swaps every acquire semaphore for a fresh one. An acquire that was
  /// abandoned (suboptimal, timed out) can leave one signalled with nobody
  /// waiting on it. Only call with the device idle.
  pub fn recycle_acquire_semaphores(&mut self) -> Result<()> {
    let sem_ci = vk::SemaphoreCreateInfo::default();
    for slot in &mut self.slots {
      unsafe {
        let fresh = self
          .device
          .create_semaphore(&sem_ci, None)
          .map_err(creating("acquire semaphore"))?;
        self.device.destroy_semaphore(slot.image_acquired, None);
        slot.image_acquired = fresh;
      }
    }
    Ok(())
  }
}

impl Drop for FrameRing {
  fn drop(&mut self) {
    unsafe {
      let fences: Vec<vk::Fence> = self
        .slots
        .iter()
        .map(|s| s.fence)
        .filter(|f| *f != vk::Fence::null())
        .collect();
      if !fences.is_empty() {
        let _ = self.device.wait_for_fences(&fences, true, timeout_ns(self.timeout));
      }
      let cmds: Vec<vk::CommandBuffer> = self.slots.iter().map(|s| s.cmd).collect();
      for slot in self.slots.drain(..) {
        self.device.destroy_semaphore(slot.image_acquired, None);
        self.device.destroy_fence(slot.fence, None);
      }
      if !cmds.is_empty() {
        self.device.free_command_buffers(self.pool, &cmds);
      }
    }
    debug!("frame ring destroyed");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn outstanding_frames_never_exceed_ring_size() {
    for n in 1..=2 {
      let mut t = SlotTracker::new(n);
      for _ in 0..50 {
        t.complete().unwrap();
        t.begin().unwrap();
        assert!(t.outstanding() < n);
        t.submit().unwrap();
        assert!(t.outstanding() <= n);
      }
    }
  }

  #[test]
  fn ring_advances_round_robin() {
    let mut t = SlotTracker::new(2);
    let mut seen = Vec::new();
    for _ in 0..5 {
      seen.push(t.current());
      t.complete().unwrap();
      t.begin().unwrap();
      t.submit().unwrap();
    }
    assert_eq!(seen, vec![0, 1, 0, 1, 0]);
    assert_eq!(t.outstanding(), 2);
  }

  #[test]
  fn cannot_record_into_a_pending_slot() {
    let mut t = SlotTracker::new(1);
    t.begin().unwrap();
    t.submit().unwrap();
    let err = t.begin().unwrap_err();
    assert_eq!(err.state, SlotState::Submitted);
    assert_eq!(err.to_string(), "frame slot 0: cannot begin recording while submitted");
    t.complete().unwrap();
    t.begin().unwrap();
  }

  #[test]
  fn submit_requires_recording() {
    let mut t = SlotTracker::new(2);
    assert!(t.submit().is_err());
    t.begin().unwrap();
    assert!(t.begin().is_err());
    assert!(t.complete().is_err());
    t.submit().unwrap();
    assert_eq!(t.current(), 1);
  }

  #[test]
  fn draining_clears_every_slot() {
    let mut t = SlotTracker::new(2);
    for _ in 0..2 {
      t.begin().unwrap();
      t.submit().unwrap();
    }
    assert_eq!(t.outstanding(), 2);
    t.complete_all();
    assert_eq!(t.outstanding(), 0);
    assert_eq!(t.len(), 2);
  }

  #[test]
  fn timeout_saturates() {
    assert_eq!(timeout_ns(Duration::from_millis(3)), 3_000_000);
    assert_eq!(timeout_ns(Duration::MAX), u64::MAX);
  }
}
