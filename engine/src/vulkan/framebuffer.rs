use anyhow::Result;
use vulkanalia::vk::{self, DeviceV1_0, HasBuilder};

use super::{device::VulkanDevice, handles::create_all, render_pass::VulkanRenderPass};
use crate::error::{ErrorContext, Subsystem};

pub struct VulkanFramebuffer;

impl VulkanFramebuffer {
    /// One framebuffer per swapchain image view.
    pub unsafe fn create(
        device: &VulkanDevice,
        render_pass: &VulkanRenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Vec<vk::Framebuffer>> {
        let framebuffers = create_all(
            image_views.len(),
            |i| {
                let attachments = &[image_views[i]];
                let create_info = vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass.vk_render_pass)
                    .attachments(attachments)
                    .width(extent.width)
                    .height(extent.height)
                    .layers(1);

                device.vk_device.create_framebuffer(&create_info, None)
            },
            |f| device.vk_device.destroy_framebuffer(f, None),
        )
        .creation_failed(Subsystem::Swapchain, "create framebuffer")?;
        Ok(framebuffers)
    }

    pub unsafe fn destroy(device: &VulkanDevice, framebuffers: &mut Vec<vk::Framebuffer>) {
        framebuffers
            .drain(..)
            .for_each(|f| device.vk_device.destroy_framebuffer(f, None));
    }
}
