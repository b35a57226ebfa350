use vulkanalia::vk::{self, DeviceV1_0};

use super::device::VulkanDevice;

/// A buffer together with the memory bound to it.
///
/// Not `Clone`: exactly one owner releases the handles, once, via [`destroy`].
///
/// [`destroy`]: VulkanBuffer::destroy
#[derive(Debug)]
pub struct VulkanBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

impl VulkanBuffer {
    pub unsafe fn destroy(self, device: &VulkanDevice) {
        device.vk_device.destroy_buffer(self.buffer, None);
        device.vk_device.free_memory(self.memory, None);
    }
}
