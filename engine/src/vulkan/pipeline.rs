use std::path::Path;

use anyhow::{anyhow, Result};
use glam::Vec3;
use log::*;
use vulkanalia::bytecode::Bytecode;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};

use super::{
    allocator::ResourceAllocator,
    descriptor::DescriptorManager,
    device::VulkanDevice,
    object::{Mesh, RenderObject, Vertex},
    swapchain::SwapchainManager,
};
use crate::error::{EngineError, ErrorContext, Subsystem};
use crate::registry::{DrawRegistry, ObjectId, PipelineId};
use crate::texture::TextureData;

/// Reads a compiled shader blob. Contents are checked only when the shader
/// module is created.
pub fn load_shader_code(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let code = std::fs::read(path).creation_failed(Subsystem::Io, &format!("read shader {}", path.display()))?;
    debug!("Loaded shader `{}` ({} bytes).", path.display(), code.len());
    Ok(code)
}

/// A compiled graphics pipeline and the shader code it was built from, kept
/// so the pipeline can be rebuilt against a new swapchain.
#[derive(Debug)]
struct GraphicsPipeline {
    vertex_code: Vec<u8>,
    fragment_code: Vec<u8>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    unsafe fn destroy_handles(&mut self, device: &VulkanDevice) {
        if !self.pipeline.is_null() {
            device.vk_device.destroy_pipeline(self.pipeline, None);
            self.pipeline = vk::Pipeline::null();
        }
        if !self.layout.is_null() {
            device.vk_device.destroy_pipeline_layout(self.layout, None);
            self.layout = vk::PipelineLayout::null();
        }
    }
}

/// Owns every pipeline, every render object and the bookkeeping of which
/// pipeline draws which object.
#[derive(Debug)]
pub struct PipelineManager {
    descriptors: DescriptorManager,
    pipelines: Vec<GraphicsPipeline>,
    objects: Vec<RenderObject>,
    registry: DrawRegistry,
}

impl PipelineManager {
    pub unsafe fn new(device: &VulkanDevice) -> Result<Self> {
        Ok(Self {
            descriptors: DescriptorManager::new(device)?,
            pipelines: Vec::new(),
            objects: Vec::new(),
            registry: DrawRegistry::new(),
        })
    }

    pub fn registry(&self) -> &DrawRegistry {
        &self.registry
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<(vk::Pipeline, vk::PipelineLayout)> {
        self.pipelines
            .get(id.index())
            .map(|p| (p.pipeline, p.layout))
    }

    pub fn object(&self, id: ObjectId) -> Option<&RenderObject> {
        self.objects.get(id.index())
    }

    pub unsafe fn build_pipeline(
        &mut self,
        device: &VulkanDevice,
        swapchain: &SwapchainManager,
        vertex_code: Vec<u8>,
        fragment_code: Vec<u8>,
    ) -> Result<PipelineId> {
        let mut pipeline = GraphicsPipeline {
            vertex_code,
            fragment_code,
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
        };
        self.compile(device, swapchain, &mut pipeline)?;
        self.pipelines.push(pipeline);

        let id = self.registry.add_pipeline();
        info!("Built pipeline {}.", id.index());
        Ok(id)
    }

    /// Uploads a quad with `texture` and gives it per-image bindings.
    ///
    /// The descriptor pool is resized, so the device must be idle.
    pub unsafe fn create_object(
        &mut self,
        device: &VulkanDevice,
        allocator: &ResourceAllocator,
        swapchain: &SwapchainManager,
        texture: &TextureData,
    ) -> Result<ObjectId> {
        let object = RenderObject::create(device, allocator, &Mesh::quad(), texture)?;
        self.objects.push(object);
        let id = self.registry.add_object();

        self.rebuild_frame_resources(device, allocator, swapchain)?;
        debug!("Created object {}.", id.index());
        Ok(id)
    }

    pub fn bind_object_to_pipeline(&mut self, pipeline: PipelineId, object: ObjectId) -> Result<()> {
        self.registry.bind(pipeline, object)
    }

    pub fn set_object_offset(&mut self, object: ObjectId, offset: Vec3, extent: vk::Extent2D) -> Result<()> {
        let object = self.objects.get_mut(object.index()).ok_or_else(|| {
            anyhow!(EngineError::ResourceCreation(
                Subsystem::Pipeline,
                format!("unknown object {}", object.index()),
            ))
        })?;
        object.set_offset(offset, extent);
        Ok(())
    }

    /// Rebuilds every swapchain-dependent piece: pipeline state (viewport,
    /// render pass) and each object's uniform buffers and descriptor sets.
    /// Object and pipeline identities are unchanged.
    pub unsafe fn rebuild(
        &mut self,
        device: &VulkanDevice,
        allocator: &ResourceAllocator,
        swapchain: &SwapchainManager,
    ) -> Result<()> {
        let mut pipelines = std::mem::take(&mut self.pipelines);
        let compiled = pipelines.iter_mut().try_for_each(|p| {
            p.destroy_handles(device);
            self.compile(device, swapchain, p)
        });
        self.pipelines = pipelines;
        compiled?;

        self.rebuild_frame_resources(device, allocator, swapchain)
    }

    unsafe fn rebuild_frame_resources(
        &mut self,
        device: &VulkanDevice,
        allocator: &ResourceAllocator,
        swapchain: &SwapchainManager,
    ) -> Result<()> {
        self.objects
            .iter_mut()
            .for_each(|o| o.destroy_frame_resources(device));

        let image_count = swapchain.image_count();
        self.descriptors
            .rebuild_pool(device, self.objects.len(), image_count)?;

        for object in &mut self.objects {
            object.create_frame_resources(
                device,
                allocator,
                &self.descriptors,
                image_count,
                swapchain.extent,
            )?;
        }

        Ok(())
    }

    pub unsafe fn update_uniforms(
        &self,
        device: &VulkanDevice,
        allocator: &ResourceAllocator,
        image_index: usize,
    ) -> Result<()> {
        for (_, id) in self.registry.draw_order() {
            if let Some(object) = self.objects.get(id.index()) {
                object.write_uniforms(device, allocator, image_index)?;
            }
        }
        Ok(())
    }

    unsafe fn compile(
        &self,
        device: &VulkanDevice,
        swapchain: &SwapchainManager,
        target: &mut GraphicsPipeline,
    ) -> Result<()> {
        let vertex_shader_module = create_shader_module(device, &target.vertex_code)?;
        let fragment_shader_module = match create_shader_module(device, &target.fragment_code) {
            Ok(module) => module,
            Err(error) => {
                device
                    .vk_device
                    .destroy_shader_module(vertex_shader_module, None);
                return Err(error);
            }
        };

        let result = self.create_pipeline(
            device,
            swapchain,
            vertex_shader_module,
            fragment_shader_module,
            target,
        );

        device
            .vk_device
            .destroy_shader_module(vertex_shader_module, None);
        device
            .vk_device
            .destroy_shader_module(fragment_shader_module, None);

        result
    }

    unsafe fn create_pipeline(
        &self,
        device: &VulkanDevice,
        swapchain: &SwapchainManager,
        vertex_shader_module: vk::ShaderModule,
        fragment_shader_module: vk::ShaderModule,
        target: &mut GraphicsPipeline,
    ) -> Result<()> {
        let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vertex_shader_module)
            .name(b"main\0");

        let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(fragment_shader_module)
            .name(b"main\0");

        let binding_descriptions = &[Vertex::binding_description()];
        let attribute_descriptions = Vertex::attribute_descriptions();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(binding_descriptions)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport = vk::Viewport::builder()
            .x(0.0)
            .y(0.0)
            .width(swapchain.extent.width as f32)
            .height(swapchain.extent.height as f32)
            .min_depth(0.0)
            .max_depth(1.0);

        let scissor = vk::Rect2D::builder()
            .offset(vk::Offset2D { x: 0, y: 0 })
            .extent(swapchain.extent);

        let viewports = &[viewport];
        let scissors = &[scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(viewports)
            .scissors(scissors);

        // rasterizer
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        // multisampling
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::_1);

        // opaque overwrite
        let attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::all())
            .blend_enable(false)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ZERO)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD);

        let attachments = &[attachment];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(attachments)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        // layout
        let set_layouts = &[self.descriptors.layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        target.layout = device
            .vk_device
            .create_pipeline_layout(&layout_info, None)
            .creation_failed(Subsystem::Pipeline, "create pipeline layout")?;

        let stages = &[vert_stage, frag_stage];
        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .layout(target.layout)
            .render_pass(swapchain.render_pass.vk_render_pass)
            .subpass(0);

        match device
            .vk_device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        {
            Ok((pipelines, _)) => {
                target.pipeline = pipelines.into_iter().next().unwrap_or_default();
                Ok(())
            }
            Err(error) => {
                target.destroy_handles(device);
                Err(anyhow!(EngineError::ResourceCreation(
                    Subsystem::Pipeline,
                    format!("create graphics pipeline: {error}"),
                )))
            }
        }
    }

    /// Destroys objects, then pipelines, then the shared descriptor state.
    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        self.objects.drain(..).for_each(|o| o.destroy(device));
        self.pipelines
            .iter_mut()
            .for_each(|p| p.destroy_handles(device));
        self.pipelines.clear();
        self.descriptors.destroy(device);
        self.registry = DrawRegistry::new();
    }
}

unsafe fn create_shader_module(device: &VulkanDevice, bytecode: &[u8]) -> Result<vk::ShaderModule> {
    let bytecode = Bytecode::new(bytecode).creation_failed(Subsystem::Pipeline, "parse shader bytecode")?;
    let info = vk::ShaderModuleCreateInfo::builder()
        .code_size(bytecode.code_size())
        .code(bytecode.code());

    Ok(device
        .vk_device
        .create_shader_module(&info, None)
        .creation_failed(Subsystem::Pipeline, "create shader module")?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_shader_is_an_io_failure() {
        let error = load_shader_code("shaders/does-not-exist.spv").unwrap_err();
        assert_eq!(crate::error::subsystem_of(&error), Some(Subsystem::Io));
        assert!(error.to_string().contains("does-not-exist.spv"));
    }

    #[test]
    fn shader_bytes_are_returned_untouched() {
        let path = std::env::temp_dir().join(format!("mix-engine-shader-{}.spv", std::process::id()));
        std::fs::write(&path, [0x03, 0x02, 0x23, 0x07, 0xAA]).unwrap();
        let code = load_shader_code(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(code, vec![0x03, 0x02, 0x23, 0x07, 0xAA]);
    }
}
