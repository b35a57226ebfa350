use vulkanalia::{vk, Version};

/// Frames whose GPU work may be outstanding at the same time.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Fence waits never give up; a timeout is reported as fatal.
pub const FENCE_TIMEOUT: u64 = u64::MAX;

pub const PORTABILITY_MACOS_VERSION: Version = Version::new(1, 3, 216);
pub const VALIDATION_LAYER: vk::ExtensionName =
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation");
pub const DEVICE_EXTENSIONS: &[vk::ExtensionName] = &[vk::KHR_SWAPCHAIN_EXTENSION.name];
