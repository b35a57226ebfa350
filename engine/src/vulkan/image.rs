use vulkanalia::vk::{self, DeviceV1_0};

use super::device::VulkanDevice;

/// A 2D image, its bound memory and the view shaders sample it through.
#[derive(Debug)]
pub struct VulkanImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl VulkanImage {
    pub unsafe fn destroy(self, device: &VulkanDevice) {
        device.vk_device.destroy_image_view(self.view, None);
        device.vk_device.destroy_image(self.image, None);
        device.vk_device.free_memory(self.memory, None);
    }
}
