//! GPU memory-backed buffers and images.
//!
//! Every call allocates fresh memory and hands ownership to the caller; there
//! is no pooling or caching. Uploads into device-local memory go through a
//! host-visible staging buffer and a one-shot command buffer that is waited on
//! before returning, so the resource is fully populated when the call ends.

use std::mem::size_of_val;
use std::ptr::copy_nonoverlapping as memcpy;

use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder, InstanceV1_0};

use super::{
    buffer::VulkanBuffer, context::VulkanContext, device::VulkanDevice, image::VulkanImage,
    instance::VulkanInstance,
};
use crate::error::{EngineError, ErrorContext, Subsystem};
use crate::texture::TextureData;

/// Index of a memory type allowed by `type_filter` whose flags include all of
/// `properties`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32)).find(|i| {
        let allowed = type_filter & (1 << *i) != 0;
        allowed
            && memory.memory_types[*i as usize]
                .property_flags
                .contains(properties)
    })
}

/// Access masks and pipeline stages for the layout transitions textures go
/// through.
pub fn transition_masks(
    from: vk::ImageLayout,
    to: vk::ImageLayout,
) -> Option<(vk::AccessFlags, vk::AccessFlags, vk::PipelineStageFlags, vk::PipelineStageFlags)> {
    match (from, to) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Some((
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Some((
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ))
        }
        _ => None,
    }
}

#[derive(Debug)]
pub struct ResourceAllocator {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    command_pool: vk::CommandPool,
    queue: vk::Queue,
}

impl ResourceAllocator {
    pub unsafe fn new(
        instance: &VulkanInstance,
        device: &VulkanDevice,
        context: &VulkanContext,
    ) -> Result<Self> {
        let memory_properties = instance
            .vk_instance
            .get_physical_device_memory_properties(context.physical_device);

        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(context.queue_families.graphics);
        let command_pool = device
            .vk_device
            .create_command_pool(&info, None)
            .init_failed(Subsystem::Allocator, "create transfer command pool")?;

        Ok(Self {
            memory_properties,
            command_pool,
            queue: context.graphics_queue,
        })
    }

    fn memory_type(&self, requirements: vk::MemoryRequirements, properties: vk::MemoryPropertyFlags) -> Result<u32> {
        find_memory_type(&self.memory_properties, requirements.memory_type_bits, properties)
            .ok_or_else(|| {
                anyhow!(EngineError::ResourceCreation(
                    Subsystem::Allocator,
                    format!("no memory type with {:?} in filter {:#b}", properties, requirements.memory_type_bits),
                ))
            })
    }

    pub unsafe fn create_buffer(
        &self,
        device: &VulkanDevice,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<VulkanBuffer> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = device
            .vk_device
            .create_buffer(&buffer_info, None)
            .creation_failed(Subsystem::Allocator, "create buffer")?;

        let requirements = device.vk_device.get_buffer_memory_requirements(buffer);
        let memory_type = match self.memory_type(requirements, properties) {
            Ok(index) => index,
            Err(error) => {
                device.vk_device.destroy_buffer(buffer, None);
                return Err(error);
            }
        };

        let memory_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = match device.vk_device.allocate_memory(&memory_info, None) {
            Ok(memory) => memory,
            Err(error) => {
                device.vk_device.destroy_buffer(buffer, None);
                return Err(anyhow!(EngineError::ResourceCreation(
                    Subsystem::Allocator,
                    format!("allocate buffer memory: {error}"),
                )));
            }
        };

        let buffer = VulkanBuffer { buffer, memory, size };
        if let Err(error) = device.vk_device.bind_buffer_memory(buffer.buffer, buffer.memory, 0) {
            buffer.destroy(device);
            return Err(anyhow!(EngineError::ResourceCreation(
                Subsystem::Allocator,
                format!("bind buffer memory: {error}"),
            )));
        }

        trace!("Allocated {} byte buffer ({:?}).", size, usage);
        Ok(buffer)
    }

    #[allow(clippy::too_many_arguments)]
    pub unsafe fn create_image(
        &self,
        device: &VulkanDevice,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<VulkanImage> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::_1);

        let image = device
            .vk_device
            .create_image(&info, None)
            .creation_failed(Subsystem::Allocator, "create image")?;

        let requirements = device.vk_device.get_image_memory_requirements(image);
        let memory_type = match self.memory_type(requirements, properties) {
            Ok(index) => index,
            Err(error) => {
                device.vk_device.destroy_image(image, None);
                return Err(error);
            }
        };

        let memory_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        let memory = match device.vk_device.allocate_memory(&memory_info, None) {
            Ok(memory) => memory,
            Err(error) => {
                device.vk_device.destroy_image(image, None);
                return Err(anyhow!(EngineError::ResourceCreation(
                    Subsystem::Allocator,
                    format!("allocate image memory: {error}"),
                )));
            }
        };

        let image = VulkanImage {
            image,
            memory,
            view: vk::ImageView::null(),
            format,
            extent: vk::Extent2D { width, height },
        };
        if let Err(error) = device.vk_device.bind_image_memory(image.image, image.memory, 0) {
            image.destroy(device);
            return Err(anyhow!(EngineError::ResourceCreation(
                Subsystem::Allocator,
                format!("bind image memory: {error}"),
            )));
        }

        Ok(image)
    }

    pub unsafe fn create_image_view(
        &self,
        device: &VulkanDevice,
        image: vk::Image,
        format: vk::Format,
    ) -> Result<vk::ImageView> {
        let subresource_range = vk::ImageSubresourceRange::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);

        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::_2D)
            .format(format)
            .subresource_range(subresource_range);

        Ok(device
            .vk_device
            .create_image_view(&info, None)
            .creation_failed(Subsystem::Allocator, "create image view")?)
    }

    /// Copies `data` into host-visible `dst`.
    pub unsafe fn copy_to_device<T: Copy>(
        &self,
        device: &VulkanDevice,
        dst: &VulkanBuffer,
        data: &[T],
    ) -> Result<()> {
        let size = size_of_val(data) as vk::DeviceSize;
        if size > dst.size {
            return Err(anyhow!(EngineError::ResourceCreation(
                Subsystem::Allocator,
                format!("{size} bytes do not fit a {} byte buffer", dst.size),
            )));
        }

        let memory = device
            .vk_device
            .map_memory(dst.memory, 0, size, vk::MemoryMapFlags::empty())
            .creation_failed(Subsystem::Allocator, "map memory")?;
        memcpy(data.as_ptr(), memory.cast(), data.len());
        device.vk_device.unmap_memory(dst.memory);
        Ok(())
    }

    /// Creates a device-local buffer filled with `data` through a staging copy.
    pub unsafe fn create_device_local_buffer<T: Copy>(
        &self,
        device: &VulkanDevice,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<VulkanBuffer> {
        let size = size_of_val(data) as vk::DeviceSize;
        let staging = self.create_staging_buffer(device, size)?;

        let result = self.copy_to_device(device, &staging, data).and_then(|_| {
            let buffer = self.create_buffer(
                device,
                size,
                vk::BufferUsageFlags::TRANSFER_DST | usage,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;
            match self.copy_buffer(device, staging.buffer, buffer.buffer, size) {
                Ok(()) => Ok(buffer),
                Err(error) => {
                    buffer.destroy(device);
                    Err(error)
                }
            }
        });

        staging.destroy(device);
        result
    }

    /// Uploads RGBA8 pixels into a sampled, device-local image with a view.
    pub unsafe fn create_texture(&self, device: &VulkanDevice, texture: &TextureData) -> Result<VulkanImage> {
        let format = vk::Format::R8G8B8A8_SRGB;
        let staging = self.create_staging_buffer(device, texture.byte_size())?;

        let result = self
            .copy_to_device(device, &staging, texture.pixels())
            .and_then(|_| {
                let mut image = self.create_image(
                    device,
                    texture.width(),
                    texture.height(),
                    format,
                    vk::ImageTiling::OPTIMAL,
                    vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )?;

                let populated = self
                    .transition_layout(
                        device,
                        image.image,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    )
                    .and_then(|_| {
                        self.copy_buffer_to_image(device, staging.buffer, image.image, texture.width(), texture.height())
                    })
                    .and_then(|_| {
                        self.transition_layout(
                            device,
                            image.image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        )
                    })
                    .and_then(|_| self.create_image_view(device, image.image, format));

                match populated {
                    Ok(view) => {
                        image.view = view;
                        Ok(image)
                    }
                    Err(error) => {
                        image.destroy(device);
                        Err(error)
                    }
                }
            });

        staging.destroy(device);
        result
    }

    unsafe fn create_staging_buffer(&self, device: &VulkanDevice, size: vk::DeviceSize) -> Result<VulkanBuffer> {
        self.create_buffer(
            device,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
        )
    }

    pub unsafe fn transition_layout(
        &self,
        device: &VulkanDevice,
        image: vk::Image,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    ) -> Result<()> {
        let (src_access_mask, dst_access_mask, src_stage_mask, dst_stage_mask) =
            transition_masks(from, to).ok_or_else(|| {
                anyhow!(EngineError::ResourceCreation(
                    Subsystem::Allocator,
                    format!("unsupported layout transition {:?} -> {:?}", from, to),
                ))
            })?;

        let command_buffer = self.begin_single_time_commands(device)?;

        let subresource = vk::ImageSubresourceRange::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1);

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(from)
            .new_layout(to)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource)
            .src_access_mask(src_access_mask)
            .dst_access_mask(dst_access_mask);

        device.vk_device.cmd_pipeline_barrier(
            command_buffer,
            src_stage_mask,
            dst_stage_mask,
            vk::DependencyFlags::empty(),
            &[] as &[vk::MemoryBarrier],
            &[] as &[vk::BufferMemoryBarrier],
            &[barrier],
        );

        self.end_single_time_commands(device, command_buffer)
    }

    pub unsafe fn copy_buffer_to_image(
        &self,
        device: &VulkanDevice,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let command_buffer = self.begin_single_time_commands(device)?;

        let subresource = vk::ImageSubresourceLayers::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(subresource)
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });

        device.vk_device.cmd_copy_buffer_to_image(
            command_buffer,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );

        self.end_single_time_commands(device, command_buffer)
    }

    pub unsafe fn copy_buffer(
        &self,
        device: &VulkanDevice,
        source: vk::Buffer,
        destination: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<()> {
        let command_buffer = self.begin_single_time_commands(device)?;

        let regions = vk::BufferCopy::builder().size(size);
        device
            .vk_device
            .cmd_copy_buffer(command_buffer, source, destination, &[regions]);

        self.end_single_time_commands(device, command_buffer)
    }

    unsafe fn begin_single_time_commands(&self, device: &VulkanDevice) -> Result<vk::CommandBuffer> {
        let info = vk::CommandBufferAllocateInfo::builder()
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_pool(self.command_pool)
            .command_buffer_count(1);

        let command_buffer = device
            .vk_device
            .allocate_command_buffers(&info)
            .creation_failed(Subsystem::Allocator, "allocate one-shot command buffer")?[0];

        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        device
            .vk_device
            .begin_command_buffer(command_buffer, &info)
            .creation_failed(Subsystem::Allocator, "begin one-shot command buffer")?;

        Ok(command_buffer)
    }

    /// Submits and blocks until the queue has drained the commands.
    unsafe fn end_single_time_commands(&self, device: &VulkanDevice, command_buffer: vk::CommandBuffer) -> Result<()> {
        let command_buffers = &[command_buffer];
        let result = device
            .vk_device
            .end_command_buffer(command_buffer)
            .creation_failed(Subsystem::Allocator, "end one-shot command buffer")
            .and_then(|_| {
                let info = vk::SubmitInfo::builder().command_buffers(command_buffers);
                device
                    .vk_device
                    .queue_submit(self.queue, &[info], vk::Fence::null())
                    .sync_failed(Subsystem::Allocator, "submit one-shot command buffer")
            })
            .and_then(|_| {
                device
                    .vk_device
                    .queue_wait_idle(self.queue)
                    .sync_failed(Subsystem::Allocator, "wait for transfer queue")
            });

        device
            .vk_device
            .free_command_buffers(self.command_pool, command_buffers);

        result?;
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        device.vk_device.destroy_command_pool(self.command_pool, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        properties.memory_type_count = types.len() as u32;
        for (i, flags) in types.iter().enumerate() {
            properties.memory_types[i] = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        properties
    }

    #[test]
    fn finds_superset_of_requested_flags() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&properties, 0b111, wanted), Some(2));
        assert_eq!(
            find_memory_type(&properties, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Some(1)
        );
    }

    #[test]
    fn respects_type_filter() {
        let properties = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(
            find_memory_type(&properties, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(1)
        );
        assert_eq!(
            find_memory_type(&properties, 0b100, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }

    #[test]
    fn fails_when_no_type_matches() {
        let properties = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert_eq!(
            find_memory_type(&properties, u32::MAX, vk::MemoryPropertyFlags::HOST_VISIBLE),
            None
        );
    }

    #[test]
    fn texture_transitions_are_supported() {
        let (src, dst, _, dst_stage) = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert!(src.is_empty());
        assert_eq!(dst, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);

        let (src, dst, _, dst_stage) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(src, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst, vk::AccessFlags::SHADER_READ);
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        assert!(transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::PRESENT_SRC_KHR
        )
        .is_none());
    }
}
