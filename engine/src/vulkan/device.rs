use std::collections::HashSet;

use anyhow::{anyhow, Result};
use log::*;
use thiserror::Error;
use vulkanalia::{
    vk::{self, DeviceV1_0, HasBuilder, InstanceV1_0, KhrSurfaceExtension},
    Device, Entry,
};

use super::{constants, context::VulkanContext, instance::VulkanInstance, swapchain::SwapchainSupport};
use crate::error::{EngineError, ErrorContext, Subsystem};

#[derive(Debug)]
pub struct VulkanDevice {
    pub vk_device: Device,
}

#[derive(Debug, Error)]
#[error("Missing {0}.")]
pub struct SuitabilityError(pub &'static str);

impl VulkanDevice {
    unsafe fn pick_physical_device(
        instance: &VulkanInstance,
        context: &mut VulkanContext,
    ) -> Result<()> {
        let physical_devices = instance
            .vk_instance
            .enumerate_physical_devices()
            .init_failed(Subsystem::Device, "enumerate physical devices")?;

        for physical_device in physical_devices {
            let properties = instance
                .vk_instance
                .get_physical_device_properties(physical_device);

            match VulkanDevice::check_physical_device(instance, context, physical_device) {
                Err(error) => warn!(
                    "Skipping physical device (`{}`): {}",
                    properties.device_name, error
                ),
                Ok(indices) => {
                    info!("Selected physical device (`{}`).", properties.device_name);
                    context.physical_device = physical_device;
                    context.queue_families = indices;
                    return Ok(());
                }
            }
        }

        Err(anyhow!(EngineError::Initialization(
            Subsystem::Device,
            "failed to find a GPU with required features".into(),
        )))
    }

    unsafe fn check_physical_device(
        instance: &VulkanInstance,
        context: &VulkanContext,
        physical_device: vk::PhysicalDevice,
    ) -> Result<QueueFamilyIndices> {
        let indices = QueueFamilyIndices::get(instance, context, physical_device)?;
        VulkanDevice::check_physical_device_extensions(instance, physical_device)?;

        let support = SwapchainSupport::get(instance, context.surface, physical_device)?;
        if !support.is_adequate() {
            return Err(anyhow!(SuitabilityError("sufficient swapchain support")));
        }

        Ok(indices)
    }

    unsafe fn check_physical_device_extensions(
        instance: &VulkanInstance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<()> {
        let extensions = instance
            .vk_instance
            .enumerate_device_extension_properties(physical_device, None)?
            .iter()
            .map(|e| e.extension_name)
            .collect::<HashSet<_>>();

        if constants::DEVICE_EXTENSIONS.iter().all(|e| extensions.contains(e)) {
            Ok(())
        } else {
            Err(anyhow!(SuitabilityError("required device extensions")))
        }
    }

    pub unsafe fn new(
        entry: &Entry,
        instance: &VulkanInstance,
        validation: bool,
        context: &mut VulkanContext,
    ) -> Result<VulkanDevice> {
        VulkanDevice::pick_physical_device(instance, context)?;

        let indices = context.queue_families;
        let unique_indices = indices.unique();

        let queue_priorities = &[1.0];
        let queue_infos = unique_indices
            .iter()
            .map(|i| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*i)
                    .queue_priorities(queue_priorities)
            })
            .collect::<Vec<_>>();

        let layers = if validation {
            vec![constants::VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let mut extensions = constants::DEVICE_EXTENSIONS
            .iter()
            .map(|n| n.as_ptr())
            .collect::<Vec<_>>();

        // Required by Vulkan SDK on macOS since 1.3.216.
        if cfg!(target_os = "macos")
            && entry.version().init_failed(Subsystem::Device, "query version")?
                >= constants::PORTABILITY_MACOS_VERSION
        {
            extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::builder();

        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = instance
            .vk_instance
            .create_device(context.physical_device, &info, None)
            .init_failed(Subsystem::Device, "create logical device")?;

        context.graphics_queue = device.get_device_queue(indices.graphics, 0);
        context.present_queue = device.get_device_queue(indices.present, 0);

        Ok(VulkanDevice { vk_device: device })
    }

    pub unsafe fn wait_idle(&self) -> Result<()> {
        self.vk_device
            .device_wait_idle()
            .sync_failed(Subsystem::Device, "wait for device idle")?;
        Ok(())
    }

    pub unsafe fn destroy(&mut self) {
        self.vk_device.destroy_device(None);
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    unsafe fn get(
        instance: &VulkanInstance,
        context: &VulkanContext,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = instance
            .vk_instance
            .get_physical_device_queue_family_properties(physical_device);

        let graphics = properties
            .iter()
            .position(|p| p.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32);

        let mut present = None;
        for (index, _) in properties.iter().enumerate() {
            if instance.vk_instance.get_physical_device_surface_support_khr(
                physical_device,
                index as u32,
                context.surface,
            )? {
                present = Some(index as u32);
                break;
            }
        }

        if let (Some(graphics), Some(present)) = (graphics, present) {
            Ok(Self { graphics, present })
        } else {
            Err(anyhow!(SuitabilityError("required queue families")))
        }
    }

    /// Queue families to create queues on, without duplicates.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_family_creates_single_queue() {
        let indices = QueueFamilyIndices { graphics: 0, present: 0 };
        assert!(indices.is_shared());
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn split_families_create_two_queues() {
        let indices = QueueFamilyIndices { graphics: 0, present: 2 };
        assert!(!indices.is_shared());
        assert_eq!(indices.unique(), vec![0, 2]);
    }

    #[test]
    fn suitability_error_reads_naturally() {
        let error = SuitabilityError("required queue families");
        assert_eq!(error.to_string(), "Missing required queue families.");
    }
}
