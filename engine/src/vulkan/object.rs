use std::mem::{offset_of, size_of};

use anyhow::Result;
use glam::{Mat4, Vec2, Vec3};
use log::*;
use vulkanalia::vk::{self, HasBuilder};

use super::{
    allocator::ResourceAllocator, buffer::VulkanBuffer, descriptor::DescriptorManager,
    device::VulkanDevice, image::VulkanImage,
};
use crate::texture::TextureData;

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Vertex {
    pub pos: Vec2,
    pub tex_coord: Vec2,
}

impl Vertex {
    pub const fn new(pos: Vec2, tex_coord: Vec2) -> Self {
        Self { pos, tex_coord }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        let pos = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(offset_of!(Vertex, pos) as u32)
            .build();
        let tex_coord = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(1)
            .format(vk::Format::R32G32_SFLOAT)
            .offset(offset_of!(Vertex, tex_coord) as u32)
            .build();
        [pos, tex_coord]
    }
}

/// Indexed geometry uploaded once per object.
#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
}

impl Mesh {
    /// A textured 1.0 x 0.6 quad centered on the origin.
    pub fn quad() -> Self {
        Self {
            vertices: vec![
                Vertex::new(Vec2::new(-0.5, -0.3), Vec2::new(1.0, 0.0)),
                Vertex::new(Vec2::new(0.5, -0.3), Vec2::new(0.0, 0.0)),
                Vertex::new(Vec2::new(0.5, 0.3), Vec2::new(0.0, 1.0)),
                Vertex::new(Vec2::new(-0.5, 0.3), Vec2::new(1.0, 1.0)),
            ],
            indices: vec![0, 1, 2, 2, 3, 0],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// Transform triple for an object translated by `offset` and viewed
    /// through a swapchain of `extent`.
    pub fn new(extent: vk::Extent2D, offset: Vec3) -> Self {
        let model = Mat4::from_rotation_x((-90.0f32).to_radians()) * Mat4::from_translation(offset);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 3.0, 0.0), Vec3::ZERO, Vec3::Z);

        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = Mat4::perspective_rh(45.0f32.to_radians(), aspect, 0.1, 10.0);
        // Vulkan clip space has Y pointing down.
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

/// Geometry, texture and per-swapchain-image bindings of one drawable.
///
/// The uniform buffers and descriptor sets are tied to the current swapchain
/// and are rebuilt with it; everything else lives until [`destroy`].
///
/// [`destroy`]: RenderObject::destroy
#[derive(Debug)]
pub struct RenderObject {
    vertex_buffer: VulkanBuffer,
    index_buffer: VulkanBuffer,
    index_count: u32,
    texture: VulkanImage,
    offset: Vec3,
    ubo: UniformBufferObject,
    uniform_buffers: Vec<VulkanBuffer>,
    descriptor_sets: Vec<vk::DescriptorSet>,
}

impl RenderObject {
    pub unsafe fn create(
        device: &VulkanDevice,
        allocator: &ResourceAllocator,
        mesh: &Mesh,
        texture: &TextureData,
    ) -> Result<Self> {
        let vertex_buffer = allocator.create_device_local_buffer(
            device,
            &mesh.vertices,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;

        let index_buffer = match allocator.create_device_local_buffer(
            device,
            &mesh.indices,
            vk::BufferUsageFlags::INDEX_BUFFER,
        ) {
            Ok(buffer) => buffer,
            Err(error) => {
                vertex_buffer.destroy(device);
                return Err(error);
            }
        };

        let texture = match allocator.create_texture(device, texture) {
            Ok(image) => image,
            Err(error) => {
                index_buffer.destroy(device);
                vertex_buffer.destroy(device);
                return Err(error);
            }
        };

        debug!(
            "Created object: {} vertices, {} indices, {}x{} texture.",
            mesh.vertices.len(),
            mesh.indices.len(),
            texture.extent.width,
            texture.extent.height
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            texture,
            offset: Vec3::ZERO,
            ubo: UniformBufferObject::new(vk::Extent2D { width: 1, height: 1 }, Vec3::ZERO),
            uniform_buffers: Vec::new(),
            descriptor_sets: Vec::new(),
        })
    }

    pub fn set_offset(&mut self, offset: Vec3, extent: vk::Extent2D) {
        self.offset = offset;
        self.update_ubo(extent);
    }

    pub fn update_ubo(&mut self, extent: vk::Extent2D) {
        self.ubo = UniformBufferObject::new(extent, self.offset);
    }

    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.buffer
    }

    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.buffer
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn descriptor_set(&self, image_index: usize) -> Option<vk::DescriptorSet> {
        self.descriptor_sets.get(image_index).copied()
    }

    /// Creates one uniform buffer and one descriptor set per swapchain image.
    ///
    /// The descriptor pool must have room for `image_count` more sets.
    pub unsafe fn create_frame_resources(
        &mut self,
        device: &VulkanDevice,
        allocator: &ResourceAllocator,
        descriptors: &DescriptorManager,
        image_count: usize,
        extent: vk::Extent2D,
    ) -> Result<()> {
        for _ in 0..image_count {
            let buffer = allocator.create_buffer(
                device,
                size_of::<UniformBufferObject>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
            )?;
            self.uniform_buffers.push(buffer);
        }

        self.descriptor_sets = descriptors.allocate_sets(device, image_count)?;
        for (set, buffer) in self.descriptor_sets.iter().zip(&self.uniform_buffers) {
            descriptors.write_set(device, *set, buffer, self.texture.view);
        }

        self.update_ubo(extent);
        Ok(())
    }

    /// Copies the current transform into the uniform buffer of `image_index`.
    pub unsafe fn write_uniforms(
        &self,
        device: &VulkanDevice,
        allocator: &ResourceAllocator,
        image_index: usize,
    ) -> Result<()> {
        match self.uniform_buffers.get(image_index) {
            Some(buffer) => allocator.copy_to_device(device, buffer, &[self.ubo]),
            None => Ok(()),
        }
    }

    /// Releases the uniform buffers; the descriptor sets go with their pool.
    pub unsafe fn destroy_frame_resources(&mut self, device: &VulkanDevice) {
        self.uniform_buffers
            .drain(..)
            .for_each(|b| b.destroy(device));
        self.descriptor_sets.clear();
    }

    pub unsafe fn destroy(mut self, device: &VulkanDevice) {
        self.destroy_frame_resources(device);
        self.texture.destroy(device);
        self.index_buffer.destroy(device);
        self.vertex_buffer.destroy(device);
    }
}
