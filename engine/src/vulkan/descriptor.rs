use std::mem::size_of;

use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};

use super::{buffer::VulkanBuffer, device::VulkanDevice, object::UniformBufferObject};
use crate::error::{EngineError, ErrorContext, Subsystem};

/// Descriptor state shared by every pipeline: one set layout (transform
/// uniform at binding 0, combined image sampler at binding 1), the texture
/// sampler and the pool the per-image sets come from.
#[derive(Debug, Default)]
pub struct DescriptorManager {
    pub layout: vk::DescriptorSetLayout,
    pub sampler: vk::Sampler,
    pool: vk::DescriptorPool,
}

/// Sets (and descriptors of each type) needed for `object_count` objects
/// drawn into `image_count` swapchain images.
pub fn pool_capacity(object_count: usize, image_count: usize) -> u32 {
    (object_count * image_count) as u32
}

impl DescriptorManager {
    pub unsafe fn new(device: &VulkanDevice) -> Result<Self> {
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;

        let ubo_binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stages);

        let sampler_binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(1)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(stages);

        let bindings = &[ubo_binding, sampler_binding];
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);

        let layout = device
            .vk_device
            .create_descriptor_set_layout(&info, None)
            .creation_failed(Subsystem::Pipeline, "create descriptor set layout")?;

        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);

        let sampler = match device.vk_device.create_sampler(&info, None) {
            Ok(sampler) => sampler,
            Err(error) => {
                device.vk_device.destroy_descriptor_set_layout(layout, None);
                return Err(anyhow!(EngineError::ResourceCreation(
                    Subsystem::Pipeline,
                    format!("create texture sampler: {error}"),
                )));
            }
        };

        Ok(Self {
            layout,
            sampler,
            pool: vk::DescriptorPool::null(),
        })
    }

    /// Replaces the pool with one sized for `object_count` objects across
    /// `image_count` images. Sets from the old pool become invalid.
    pub unsafe fn rebuild_pool(
        &mut self,
        device: &VulkanDevice,
        object_count: usize,
        image_count: usize,
    ) -> Result<()> {
        self.destroy_pool(device);

        let capacity = pool_capacity(object_count, image_count);
        if capacity == 0 {
            return Ok(());
        }

        let ubo_size = vk::DescriptorPoolSize::builder()
            .type_(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(capacity);

        let sampler_size = vk::DescriptorPoolSize::builder()
            .type_(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(capacity);

        let pool_sizes = &[ubo_size, sampler_size];
        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(pool_sizes)
            .max_sets(capacity);

        self.pool = device
            .vk_device
            .create_descriptor_pool(&info, None)
            .creation_failed(Subsystem::Pipeline, "create descriptor pool")?;

        debug!("Descriptor pool sized for {} sets.", capacity);
        Ok(())
    }

    pub unsafe fn allocate_sets(&self, device: &VulkanDevice, count: usize) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![self.layout; count];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        Ok(device
            .vk_device
            .allocate_descriptor_sets(&info)
            .creation_failed(Subsystem::Pipeline, "allocate descriptor sets")?)
    }

    /// Points `set` at an object's uniform buffer and texture view.
    pub unsafe fn write_set(
        &self,
        device: &VulkanDevice,
        set: vk::DescriptorSet,
        uniform_buffer: &VulkanBuffer,
        texture_view: vk::ImageView,
    ) {
        let buffer_info = vk::DescriptorBufferInfo::builder()
            .buffer(uniform_buffer.buffer)
            .offset(0)
            .range(size_of::<UniformBufferObject>() as vk::DeviceSize);

        let image_info = vk::DescriptorImageInfo::builder()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(texture_view)
            .sampler(self.sampler);

        let buffer_infos = &[buffer_info];
        let ubo_write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(buffer_infos);

        let image_infos = &[image_info];
        let sampler_write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(1)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(image_infos);

        device
            .vk_device
            .update_descriptor_sets(&[ubo_write, sampler_write], &[] as &[vk::CopyDescriptorSet]);
    }

    pub unsafe fn destroy_pool(&mut self, device: &VulkanDevice) {
        if !self.pool.is_null() {
            device.vk_device.destroy_descriptor_pool(self.pool, None);
            self.pool = vk::DescriptorPool::null();
        }
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        self.destroy_pool(device);
        device.vk_device.destroy_sampler(self.sampler, None);
        device
            .vk_device
            .destroy_descriptor_set_layout(self.layout, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_holds_one_set_per_object_and_image() {
        assert_eq!(pool_capacity(3, 3), 9);
        assert_eq!(pool_capacity(1, 2), 2);
    }

    #[test]
    fn empty_scene_needs_no_pool() {
        assert_eq!(pool_capacity(0, 4), 0);
    }
}
