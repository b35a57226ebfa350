use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder, KhrSwapchainExtension};

use super::{constants, device::VulkanDevice, handles::create_all};
use crate::error::{EngineError, ErrorContext, Subsystem};
use crate::frame::{AcquireOutcome, FrameSlots, InFlightFences};

/// Signals owned by one frame slot.
#[derive(Copy, Clone, Debug)]
struct FrameSlot {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

impl FrameSlot {
    /// Either every handle is created or none is left behind.
    unsafe fn create(device: &VulkanDevice) -> Result<Self, vk::ErrorCode> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Signaled so the first wait on every slot returns immediately.
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let vk_device = &device.vk_device;

        let semaphores = create_all(
            2,
            |_| vk_device.create_semaphore(&semaphore_info, None),
            |s| vk_device.destroy_semaphore(s, None),
        )?;
        let (image_available, render_finished) = (semaphores[0], semaphores[1]);
        let in_flight = match vk_device.create_fence(&fence_info, None) {
            Ok(fence) => fence,
            Err(error) => {
                semaphores
                    .iter()
                    .for_each(|s| vk_device.destroy_semaphore(*s, None));
                return Err(error);
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }
}

fn slot_of(slots: &[FrameSlot], index: usize) -> Result<FrameSlot> {
    slots.get(index).copied().ok_or_else(|| {
        anyhow!(EngineError::Synchronization(
            Subsystem::Synchronizer,
            format!("frame slot {index} does not exist"),
        ))
    })
}

/// The in-flight fences of every slot, borrowed for one protocol step.
struct SlotFences<'a> {
    device: &'a VulkanDevice,
    slots: &'a [FrameSlot],
}

impl InFlightFences for SlotFences<'_> {
    fn wait(&mut self, slot: usize) -> Result<()> {
        let fence = slot_of(self.slots, slot)?.in_flight;
        let code = unsafe {
            self.device
                .vk_device
                .wait_for_fences(&[fence], true, constants::FENCE_TIMEOUT)
        }
        .sync_failed(Subsystem::Synchronizer, "wait for in-flight fence")?;
        if code == vk::SuccessCode::TIMEOUT {
            return Err(anyhow!(EngineError::Synchronization(
                Subsystem::Synchronizer,
                "in-flight fence wait timed out".into(),
            )));
        }
        Ok(())
    }

    fn reset(&mut self, slot: usize) -> Result<()> {
        let fence = slot_of(self.slots, slot)?.in_flight;
        unsafe { self.device.vk_device.reset_fences(&[fence]) }
            .sync_failed(Subsystem::Synchronizer, "reset in-flight fence")?;
        Ok(())
    }
}

/// Gates CPU submission against GPU consumption across
/// [`constants::MAX_FRAMES_IN_FLIGHT`] frame slots.
#[derive(Debug)]
pub struct FrameSynchronizer {
    slots: Vec<FrameSlot>,
    tracker: FrameSlots,
}

impl FrameSynchronizer {
    pub unsafe fn new(device: &VulkanDevice, image_count: usize) -> Result<Self> {
        let mut synchronizer = Self {
            slots: Vec::with_capacity(constants::MAX_FRAMES_IN_FLIGHT),
            tracker: FrameSlots::new(image_count),
        };

        for _ in 0..constants::MAX_FRAMES_IN_FLIGHT {
            match FrameSlot::create(device) {
                Ok(slot) => synchronizer.slots.push(slot),
                Err(error) => {
                    synchronizer.destroy(device);
                    return Err(anyhow!(EngineError::Synchronization(
                        Subsystem::Synchronizer,
                        format!("create frame sync objects: {error}"),
                    )));
                }
            }
        }

        Ok(synchronizer)
    }

    /// Blocks until the current slot's previous submission has completed,
    /// then acquires the next image and makes sure no older frame still
    /// renders into it.
    pub unsafe fn acquire_frame(
        &mut self,
        device: &VulkanDevice,
        swapchain: vk::SwapchainKHR,
    ) -> Result<AcquireOutcome> {
        let slots = &self.slots;
        let mut fences = SlotFences { device, slots };

        let outcome = self.tracker.acquire(&mut fences, |slot| {
            let image_available = slot_of(slots, slot)?.image_available;
            let result = device.vk_device.acquire_next_image_khr(
                swapchain,
                constants::FENCE_TIMEOUT,
                image_available,
                vk::Fence::null(),
            );
            match result {
                Ok((image_index, _)) => Ok(AcquireOutcome::Ready(image_index)),
                Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
                    debug!("Swapchain out of date on acquire.");
                    Ok(AcquireOutcome::OutOfDate)
                }
                Err(error) => Err(anyhow!(EngineError::Presentation(
                    Subsystem::Swapchain,
                    format!("acquire swapchain image: {error}"),
                ))),
            }
        })?;

        if let AcquireOutcome::Ready(image_index) = outcome {
            trace!("Acquired image {} on slot {}.", image_index, self.tracker.current());
        }
        Ok(outcome)
    }

    /// Resets the slot's guard and queues `command_buffer`, waiting on image
    /// availability and signaling render completion.
    pub unsafe fn submit(
        &mut self,
        device: &VulkanDevice,
        queue: vk::Queue,
        command_buffer: vk::CommandBuffer,
    ) -> Result<()> {
        let slots = &self.slots;
        let mut fences = SlotFences { device, slots };

        self.tracker.submit(&mut fences, |_, slot| {
            let slot = slot_of(slots, slot)?;
            let wait_semaphores = &[slot.image_available];
            let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let command_buffers = &[command_buffer];
            let signal_semaphores = &[slot.render_finished];
            let submit_info = vk::SubmitInfo::builder()
                .wait_semaphores(wait_semaphores)
                .wait_dst_stage_mask(wait_stages)
                .command_buffers(command_buffers)
                .signal_semaphores(signal_semaphores);

            device
                .vk_device
                .queue_submit(queue, &[submit_info], slot.in_flight)
                .sync_failed(Subsystem::Synchronizer, "submit draw command buffer")?;
            Ok(())
        })?;

        trace!("Submitted slot {}.", self.tracker.current());
        Ok(())
    }

    /// Returns `true` when the swapchain has to be rebuilt.
    pub unsafe fn present(
        &mut self,
        device: &VulkanDevice,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        resize_requested: bool,
    ) -> Result<bool> {
        let slot = slot_of(&self.slots, self.tracker.current())?;

        let wait_semaphores = &[slot.render_finished];
        let swapchains = &[swapchain];
        let image_indices = &[image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        let result = device.vk_device.queue_present_khr(queue, &present_info);
        self.tracker.mark_presented();

        let stale = match result {
            Ok(vk::SuccessCode::SUBOPTIMAL_KHR) | Err(vk::ErrorCode::OUT_OF_DATE_KHR) => true,
            Ok(_) => false,
            Err(error) => {
                return Err(anyhow!(EngineError::Presentation(
                    Subsystem::Swapchain,
                    format!("present swapchain image: {error}"),
                )))
            }
        };

        trace!("Presented image {} (stale: {}).", image_index, stale);
        Ok(stale || resize_requested)
    }

    pub fn advance(&mut self) -> usize {
        self.tracker.advance()
    }

    /// Drops every image guard; called once the old swapchain images are gone.
    pub fn reset_image_guards(&mut self, image_count: usize) {
        self.tracker.reset_image_guards(image_count);
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        for slot in self.slots.drain(..) {
            device.vk_device.destroy_fence(slot.in_flight, None);
            device.vk_device.destroy_semaphore(slot.render_finished, None);
            device.vk_device.destroy_semaphore(slot.image_available, None);
        }
    }
}
