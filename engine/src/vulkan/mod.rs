use std::path::Path;

use anyhow::{anyhow, Result};
use glam::Vec3;
use log::*;
use vulkanalia::{
    loader::{LibloadingLoader, LIBRARY},
    vk, Entry,
};
use winit::window::Window;

use allocator::ResourceAllocator;
use command_buffer::VulkanCommandBuffer;
use context::VulkanContext;
use device::VulkanDevice;
use instance::VulkanInstance;
use pipeline::PipelineManager;
use swapchain::SwapchainManager;
use sync::FrameSynchronizer;

use crate::config::EngineConfig;
use crate::error::{EngineError, Subsystem};
use crate::frame::{AcquireOutcome, FrameBackend, Recreation};
use crate::registry::{ObjectId, PipelineId};
use crate::texture::TextureData;

mod allocator;
mod buffer;
mod command_buffer;
pub(crate) mod constants;
mod context;
mod descriptor;
mod device;
mod framebuffer;
mod handles;
mod image;
mod instance;
mod object;
mod pipeline;
mod render_pass;
mod swapchain;
mod sync;

pub use allocator::{find_memory_type, transition_masks};
pub use constants::MAX_FRAMES_IN_FLIGHT;
pub use object::{Mesh, UniformBufferObject, Vertex};
pub use pipeline::load_shader_code;
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format, has_area,
};

/// The Vulkan frame renderer: owns the device and everything created on it,
/// and runs the backend half of every frame.
#[derive(Debug)]
pub struct VulkanRenderer {
    _entry: Entry,
    instance: VulkanInstance,
    device: VulkanDevice,
    context: VulkanContext,
    allocator: ResourceAllocator,
    swapchain: SwapchainManager,
    pipelines: PipelineManager,
    commands: VulkanCommandBuffer,
    sync: FrameSynchronizer,
    drawable: vk::Extent2D,
    clear_color: [f32; 4],
}

impl VulkanRenderer {
    /// Brings up the device and swapchain, then hands the renderer to `setup`
    /// to register pipelines and objects before the first frame.
    pub unsafe fn new<F>(window: &Window, config: &EngineConfig, setup: F) -> Result<VulkanRenderer>
    where
        F: FnOnce(&mut VulkanRenderer) -> Result<()>,
    {
        let loader = LibloadingLoader::new(LIBRARY).map_err(|e| {
            anyhow!(EngineError::Initialization(
                Subsystem::Instance,
                format!("load Vulkan library: {e}"),
            ))
        })?;
        let entry = Entry::new(loader).map_err(|b| {
            anyhow!(EngineError::Initialization(
                Subsystem::Instance,
                format!("load Vulkan entry points: {b}"),
            ))
        })?;

        let size = window.inner_size();
        let drawable = vk::Extent2D {
            width: size.width,
            height: size.height,
        };

        let mut context = VulkanContext::default();
        let mut instance = VulkanInstance::new(window, &entry, &config.title, config.validation, &mut context)?;

        // Each later step unwinds everything created before it on failure.
        let mut device = match VulkanDevice::new(&entry, &instance, config.validation, &mut context) {
            Ok(device) => device,
            Err(error) => {
                instance.destroy(&mut context);
                return Err(error);
            }
        };

        let mut allocator = match ResourceAllocator::new(&instance, &device, &context) {
            Ok(allocator) => allocator,
            Err(error) => {
                device.destroy();
                instance.destroy(&mut context);
                return Err(error);
            }
        };

        let mut swapchain = match SwapchainManager::create(
            &instance,
            &device,
            &context,
            &allocator,
            drawable,
            config.preferred_format,
            config.preferred_present_mode,
        ) {
            Ok(swapchain) => swapchain,
            Err(error) => {
                allocator.destroy(&device);
                device.destroy();
                instance.destroy(&mut context);
                return Err(error);
            }
        };

        let mut pipelines = match PipelineManager::new(&device) {
            Ok(pipelines) => pipelines,
            Err(error) => {
                swapchain.destroy(&device);
                allocator.destroy(&device);
                device.destroy();
                instance.destroy(&mut context);
                return Err(error);
            }
        };

        let mut commands = match VulkanCommandBuffer::create(&device, &context, swapchain.image_count()) {
            Ok(commands) => commands,
            Err(error) => {
                pipelines.destroy(&device);
                swapchain.destroy(&device);
                allocator.destroy(&device);
                device.destroy();
                instance.destroy(&mut context);
                return Err(error);
            }
        };

        let sync = match FrameSynchronizer::new(&device, swapchain.image_count()) {
            Ok(sync) => sync,
            Err(error) => {
                commands.destroy(&device);
                pipelines.destroy(&device);
                swapchain.destroy(&device);
                allocator.destroy(&device);
                device.destroy();
                instance.destroy(&mut context);
                return Err(error);
            }
        };

        let mut renderer = VulkanRenderer {
            _entry: entry,
            instance,
            device,
            context,
            allocator,
            swapchain,
            pipelines,
            commands,
            sync,
            drawable,
            clear_color: config.clear_color,
        };

        if let Err(error) = setup(&mut renderer) {
            error!("Setup failed: {:#}", error);
            renderer.destroy();
            return Err(error);
        }

        info!(
            "Renderer ready: {} pipeline(s), {} object(s).",
            renderer.pipelines.pipeline_count(),
            renderer.pipelines.object_count()
        );
        Ok(renderer)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Pixel size used for the next swapchain rebuild.
    pub fn set_drawable_size(&mut self, width: u32, height: u32) {
        self.drawable = vk::Extent2D { width, height };
    }

    pub fn build_pipeline(&mut self, vertex_code: Vec<u8>, fragment_code: Vec<u8>) -> Result<PipelineId> {
        unsafe {
            self.pipelines
                .build_pipeline(&self.device, &self.swapchain, vertex_code, fragment_code)
        }
    }

    pub fn build_pipeline_from_files(
        &mut self,
        vertex_path: impl AsRef<Path>,
        fragment_path: impl AsRef<Path>,
    ) -> Result<PipelineId> {
        let vertex_code = load_shader_code(vertex_path)?;
        let fragment_code = load_shader_code(fragment_path)?;
        self.build_pipeline(vertex_code, fragment_code)
    }

    /// Creates a textured quad. Waits for the device to go idle first, so
    /// this is safe to call between frames as well as during setup.
    pub fn create_object(&mut self, texture: &TextureData) -> Result<ObjectId> {
        unsafe {
            self.device.wait_idle()?;
            self.pipelines
                .create_object(&self.device, &self.allocator, &self.swapchain, texture)
        }
    }

    pub fn bind_object_to_pipeline(&mut self, pipeline: PipelineId, object: ObjectId) -> Result<()> {
        self.pipelines.bind_object_to_pipeline(pipeline, object)
    }

    pub fn set_object_offset(&mut self, object: ObjectId, offset: Vec3) -> Result<()> {
        self.pipelines
            .set_object_offset(object, offset, self.swapchain.extent)
    }

    /// Waits for the device to go idle and destroys everything in reverse
    /// dependency order. Must be called exactly once.
    pub unsafe fn destroy(&mut self) {
        if let Err(error) = self.device.wait_idle() {
            warn!("Destroying renderer without idle device: {:#}", error);
        }

        self.sync.destroy(&self.device);
        self.commands.destroy(&self.device);
        self.pipelines.destroy(&self.device);
        self.swapchain.destroy(&self.device);
        self.allocator.destroy(&self.device);
        self.device.destroy();
        self.instance.destroy(&mut self.context);

        info!("Renderer destroyed.");
    }
}

impl FrameBackend for VulkanRenderer {
    fn acquire_frame(&mut self) -> Result<AcquireOutcome> {
        unsafe { self.sync.acquire_frame(&self.device, self.swapchain.swapchain) }
    }

    fn update_uniforms(&mut self, image_index: u32) -> Result<()> {
        unsafe {
            self.pipelines
                .update_uniforms(&self.device, &self.allocator, image_index as usize)
        }
    }

    fn record_commands(&mut self, image_index: u32) -> Result<()> {
        unsafe {
            self.commands.record(
                &self.device,
                &self.swapchain,
                &self.pipelines,
                image_index as usize,
                self.clear_color,
            )?;
        }
        Ok(())
    }

    fn submit(&mut self, image_index: u32) -> Result<()> {
        let command_buffer = self.commands.get(image_index as usize)?;
        unsafe {
            self.sync
                .submit(&self.device, self.context.graphics_queue, command_buffer)
        }
    }

    fn present(&mut self, image_index: u32, resize_requested: bool) -> Result<bool> {
        unsafe {
            self.sync.present(
                &self.device,
                self.context.present_queue,
                self.swapchain.swapchain,
                image_index,
                resize_requested,
            )
        }
    }

    fn advance(&mut self) {
        self.sync.advance();
    }

    fn recreate_swapchain(&mut self) -> Result<Recreation> {
        unsafe {
            self.device.wait_idle()?;

            let extent = SwapchainManager::surface_extent(&self.instance, &self.context, self.drawable)?;
            if !has_area(extent) {
                debug!(
                    "Surface is {}x{}, keeping the old swapchain.",
                    extent.width, extent.height
                );
                return Ok(Recreation::Deferred);
            }

            self.swapchain.recreate(
                &self.instance,
                &self.device,
                &self.context,
                &self.allocator,
                self.drawable,
            )?;
            self.pipelines
                .rebuild(&self.device, &self.allocator, &self.swapchain)?;

            let image_count = self.swapchain.image_count();
            self.commands.reallocate(&self.device, image_count)?;
            self.sync.reset_image_guards(image_count);
        }
        Ok(Recreation::Rebuilt)
    }
}
