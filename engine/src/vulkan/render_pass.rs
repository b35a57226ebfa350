use anyhow::Result;
use vulkanalia::vk::{self, DeviceV1_0, Handle, HasBuilder};

use super::device::VulkanDevice;
use crate::error::{ErrorContext, Subsystem};

/// Single-subpass pass that clears the swapchain image and leaves it ready
/// for presentation.
#[derive(Copy, Clone, Debug, Default)]
pub struct VulkanRenderPass {
    pub vk_render_pass: vk::RenderPass,
}

impl VulkanRenderPass {
    pub unsafe fn create(device: &VulkanDevice, format: vk::Format) -> Result<Self> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let color_attachment_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let color_attachments = &[color_attachment_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(color_attachments);

        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            );

        let attachments = &[color_attachment];
        let subpasses = &[subpass];
        let dependencies = &[dependency];
        let info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        let vk_render_pass = device
            .vk_device
            .create_render_pass(&info, None)
            .creation_failed(Subsystem::Swapchain, "create render pass")?;

        Ok(Self { vk_render_pass })
    }

    pub unsafe fn destroy(&mut self, device: &VulkanDevice) {
        if !self.vk_render_pass.is_null() {
            device.vk_device.destroy_render_pass(self.vk_render_pass, None);
            self.vk_render_pass = vk::RenderPass::null();
        }
    }
}
