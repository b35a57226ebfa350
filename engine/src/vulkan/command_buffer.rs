use anyhow::{anyhow, Result};
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};

use super::{
    context::VulkanContext, device::VulkanDevice, pipeline::PipelineManager,
    swapchain::SwapchainManager,
};
use crate::error::{EngineError, ErrorContext, Subsystem};

/// One primary command buffer per swapchain image, re-recorded every frame.
#[derive(Debug, Default)]
pub struct VulkanCommandBuffer {
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl VulkanCommandBuffer {
    pub unsafe fn create(device: &VulkanDevice, context: &VulkanContext, image_count: usize) -> Result<Self> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(context.queue_families.graphics);

        let command_pool = device
            .vk_device
            .create_command_pool(&info, None)
            .creation_failed(Subsystem::Renderer, "create command pool")?;

        let mut commands = Self {
            command_pool,
            command_buffers: Vec::new(),
        };
        if let Err(error) = commands.allocate(device, image_count) {
            commands.destroy(device);
            return Err(error);
        }
        Ok(commands)
    }

    /// Replaces the per-image buffers after the swapchain image count changed.
    pub unsafe fn reallocate(&mut self, device: &VulkanDevice, image_count: usize) -> Result<()> {
        self.free(device);
        self.allocate(device, image_count)
    }

    unsafe fn allocate(&mut self, device: &VulkanDevice, image_count: usize) -> Result<()> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(image_count as u32);

        self.command_buffers = device
            .vk_device
            .allocate_command_buffers(&allocate_info)
            .creation_failed(Subsystem::Renderer, "allocate command buffers")?;
        Ok(())
    }

    unsafe fn free(&mut self, device: &VulkanDevice) {
        if !self.command_buffers.is_empty() {
            device
                .vk_device
                .free_command_buffers(self.command_pool, &self.command_buffers);
            self.command_buffers.clear();
        }
    }

    pub fn get(&self, image_index: usize) -> Result<vk::CommandBuffer> {
        self.command_buffers.get(image_index).copied().ok_or_else(|| {
            anyhow!(EngineError::Synchronization(
                Subsystem::Renderer,
                format!("no command buffer for image {image_index}"),
            ))
        })
    }

    /// Records one render pass over `image_index`: pipelines in registration
    /// order, each bound once, then every object it owns with its own
    /// vertex, index and descriptor bindings.
    pub unsafe fn record(
        &self,
        device: &VulkanDevice,
        swapchain: &SwapchainManager,
        pipelines: &PipelineManager,
        image_index: usize,
        clear_color: [f32; 4],
    ) -> Result<vk::CommandBuffer> {
        let command_buffer = self.get(image_index)?;
        let framebuffer = swapchain.framebuffers.get(image_index).copied().ok_or_else(|| {
            anyhow!(EngineError::Synchronization(
                Subsystem::Renderer,
                format!("no framebuffer for image {image_index}"),
            ))
        })?;

        device
            .vk_device
            .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
            .creation_failed(Subsystem::Renderer, "reset command buffer")?;

        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        device
            .vk_device
            .begin_command_buffer(command_buffer, &info)
            .creation_failed(Subsystem::Renderer, "begin command buffer")?;

        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(swapchain.extent);

        let color_clear_value = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        };

        let clear_values = &[color_clear_value];
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(swapchain.render_pass.vk_render_pass)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        device
            .vk_device
            .cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);

        for (pipeline_id, object_ids) in pipelines.registry().batches() {
            let Some((pipeline, layout)) = pipelines.pipeline(pipeline_id) else {
                continue;
            };
            device
                .vk_device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);

            for object_id in object_ids {
                let Some(object) = pipelines.object(*object_id) else {
                    continue;
                };
                let Some(descriptor_set) = object.descriptor_set(image_index) else {
                    continue;
                };

                device
                    .vk_device
                    .cmd_bind_vertex_buffers(command_buffer, 0, &[object.vertex_buffer()], &[0]);
                device.vk_device.cmd_bind_index_buffer(
                    command_buffer,
                    object.index_buffer(),
                    0,
                    vk::IndexType::UINT16,
                );
                device.vk_device.cmd_bind_descriptor_sets(
                    command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    layout,
                    0,
                    &[descriptor_set],
                    &[],
                );
                device
                    .vk_device
                    .cmd_draw_indexed(command_buffer, object.index_count(), 1, 0, 0, 0);
            }
        }

        device.vk_device.cmd_end_render_pass(command_buffer);
        device
            .vk_device
            .end_command_buffer(command_buffer)
            .creation_failed(Subsystem::Renderer, "end command buffer")?;

        Ok(command_buffer)
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        self.free(device);
        if !self.command_pool.is_null() {
            device.vk_device.destroy_command_pool(self.command_pool, None);
            self.command_pool = vk::CommandPool::null();
        }
    }
}
