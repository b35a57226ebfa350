use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder, KhrSurfaceExtension, KhrSwapchainExtension};

use super::{
    allocator::ResourceAllocator, context::VulkanContext, device::VulkanDevice,
    framebuffer::VulkanFramebuffer, handles::create_all, instance::VulkanInstance,
    render_pass::VulkanRenderPass,
};
use crate::error::{EngineError, ErrorContext, Subsystem};

/// What a surface offers on a given physical device.
#[derive(Clone, Debug)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub unsafe fn get(
        instance: &VulkanInstance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let vk_instance = &instance.vk_instance;
        Ok(Self {
            capabilities: vk_instance
                .get_physical_device_surface_capabilities_khr(physical_device, surface)?,
            formats: vk_instance.get_physical_device_surface_formats_khr(physical_device, surface)?,
            present_modes: vk_instance
                .get_physical_device_surface_present_modes_khr(physical_device, surface)?,
        })
    }

    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Picks `preferred` when offered, otherwise the first supported format.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| formats.first())
        .copied()
}

/// FIFO is the only mode every surface must support.
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|m| *m == preferred)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Uses the surface's current extent unless it reports "don't care"
/// (`u32::MAX`), in which case the drawable size is clamped to the limits.
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, drawable: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: drawable.width.clamp(min.width, max.width.max(min.width)),
        height: drawable.height.clamp(min.height, max.height.max(min.height)),
    }
}

/// A zero-sized surface (minimized window) cannot back a swapchain.
pub fn has_area(extent: vk::Extent2D) -> bool {
    extent.width > 0 && extent.height > 0
}

/// One more than the minimum, capped by the maximum when the surface has one.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

/// Owns the presentable image chain and everything derived from it.
///
/// Never patched in place: a stale chain is destroyed and created again.
#[derive(Debug)]
pub struct SwapchainManager {
    preferred_format: vk::SurfaceFormatKHR,
    preferred_present_mode: vk::PresentModeKHR,
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub render_pass: VulkanRenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl SwapchainManager {
    pub unsafe fn create(
        instance: &VulkanInstance,
        device: &VulkanDevice,
        context: &VulkanContext,
        allocator: &ResourceAllocator,
        drawable: vk::Extent2D,
        preferred_format: vk::SurfaceFormatKHR,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let mut manager = Self {
            preferred_format,
            preferred_present_mode,
            swapchain: vk::SwapchainKHR::null(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            images: Vec::new(),
            image_views: Vec::new(),
            render_pass: VulkanRenderPass::default(),
            framebuffers: Vec::new(),
        };
        if let Err(error) = manager.build(instance, device, context, allocator, drawable) {
            manager.destroy(device);
            return Err(error);
        }
        Ok(manager)
    }

    /// The extent a swapchain built now would get.
    pub unsafe fn surface_extent(
        instance: &VulkanInstance,
        context: &VulkanContext,
        drawable: vk::Extent2D,
    ) -> Result<vk::Extent2D> {
        let capabilities = instance
            .vk_instance
            .get_physical_device_surface_capabilities_khr(context.physical_device, context.surface)
            .creation_failed(Subsystem::Swapchain, "query surface capabilities")?;
        Ok(choose_extent(&capabilities, drawable))
    }

    /// The caller must have waited for the device to go idle.
    pub unsafe fn recreate(
        &mut self,
        instance: &VulkanInstance,
        device: &VulkanDevice,
        context: &VulkanContext,
        allocator: &ResourceAllocator,
        drawable: vk::Extent2D,
    ) -> Result<()> {
        self.destroy(device);
        self.build(instance, device, context, allocator, drawable)
    }

    unsafe fn build(
        &mut self,
        instance: &VulkanInstance,
        device: &VulkanDevice,
        context: &VulkanContext,
        allocator: &ResourceAllocator,
        drawable: vk::Extent2D,
    ) -> Result<()> {
        let support = SwapchainSupport::get(instance, context.surface, context.physical_device)
            .creation_failed(Subsystem::Swapchain, "query surface support")?;

        let surface_format = choose_surface_format(&support.formats, self.preferred_format)
            .ok_or_else(|| {
                anyhow!(EngineError::ResourceCreation(
                    Subsystem::Swapchain,
                    "surface reports no formats".into(),
                ))
            })?;
        let present_mode = choose_present_mode(&support.present_modes, self.preferred_present_mode);
        let extent = choose_extent(&support.capabilities, drawable);
        let image_count = choose_image_count(&support.capabilities);
        if !has_area(extent) {
            return Err(anyhow!(EngineError::ResourceCreation(
                Subsystem::Swapchain,
                format!("surface extent {}x{} has no area", extent.width, extent.height),
            )));
        }

        let families = context.queue_families;
        let unique_families = families.unique();
        let (sharing_mode, family_indices): (_, &[u32]) = if families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, &[])
        } else {
            (vk::SharingMode::CONCURRENT, &unique_families)
        };

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(context.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        self.swapchain = device
            .vk_device
            .create_swapchain_khr(&info, None)
            .creation_failed(Subsystem::Swapchain, "create swapchain")?;
        self.images = device
            .vk_device
            .get_swapchain_images_khr(self.swapchain)
            .creation_failed(Subsystem::Swapchain, "get swapchain images")?;
        self.format = surface_format.format;
        self.extent = extent;
        self.present_mode = present_mode;

        self.image_views = create_all(
            self.images.len(),
            |i| allocator.create_image_view(device, self.images[i], self.format),
            |v| device.vk_device.destroy_image_view(v, None),
        )?;

        self.render_pass = VulkanRenderPass::create(device, self.format)?;
        self.framebuffers =
            VulkanFramebuffer::create(device, &self.render_pass, &self.image_views, self.extent)?;

        info!(
            "Created swapchain: {:?}/{:?}, {:?}, {}x{}, {} images.",
            surface_format.format,
            surface_format.color_space,
            present_mode,
            extent.width,
            extent.height,
            self.images.len()
        );

        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Destroys framebuffers, render pass, image views and the swapchain.
    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        VulkanFramebuffer::destroy(device, &mut self.framebuffers);
        self.render_pass.destroy(device);
        self.image_views
            .drain(..)
            .for_each(|v| device.vk_device.destroy_image_view(v, None));
        if !self.swapchain.is_null() {
            device.vk_device.destroy_swapchain_khr(self.swapchain, None);
            self.swapchain = vk::SwapchainKHR::null();
        }
        self.images.clear();
    }
}
