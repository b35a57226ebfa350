use anyhow::{anyhow, Result};
use log::*;
use std::collections::HashSet;
use std::ffi::CStr;
use std::os::raw::c_void;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk;
use vulkanalia::vk::ExtDebugUtilsExtension;
use vulkanalia::vk::KhrSurfaceExtension;
use vulkanalia::window as vk_window;
use vulkanalia::Entry;
use vulkanalia::Instance;
use winit::window::Window;

use super::constants;
use super::context::VulkanContext;
use crate::error::{EngineError, ErrorContext, Subsystem};

#[derive(Debug)]
pub struct VulkanInstance {
    pub vk_instance: Instance,
    validation: bool,
}

impl VulkanInstance {
    pub unsafe fn new(
        window: &Window,
        entry: &Entry,
        title: &str,
        validation: bool,
        context: &mut VulkanContext,
    ) -> Result<VulkanInstance> {
        let application_name = format!("{title}\0");
        let application_info = vk::ApplicationInfo::builder()
            .application_name(application_name.as_bytes())
            .application_version(vk::make_version(1, 0, 0))
            .engine_name(b"Mix\0")
            .engine_version(vk::make_version(1, 0, 0))
            .api_version(vk::make_version(1, 1, 0));

        // Layers
        let available_layers = entry
            .enumerate_instance_layer_properties()
            .init_failed(Subsystem::Instance, "enumerate layers")?
            .iter()
            .map(|l| l.layer_name)
            .collect::<HashSet<_>>();

        if validation && !available_layers.contains(&constants::VALIDATION_LAYER) {
            return Err(anyhow!(EngineError::Initialization(
                Subsystem::Instance,
                "validation layer requested but not supported".into(),
            )));
        }

        let layers = if validation {
            vec![constants::VALIDATION_LAYER.as_ptr()]
        } else {
            Vec::new()
        };

        // Extensions
        let mut extensions = vk_window::get_required_instance_extensions(window)
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        // Required by Vulkan SDK on macOS since 1.3.216.
        let flags = if cfg!(target_os = "macos")
            && entry.version().init_failed(Subsystem::Instance, "query version")?
                >= constants::PORTABILITY_MACOS_VERSION
        {
            info!("Enabling extensions for macOS portability.");
            extensions.push(
                vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION
                    .name
                    .as_ptr(),
            );
            extensions.push(vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name.as_ptr());
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        } else {
            vk::InstanceCreateFlags::empty()
        };

        if validation {
            extensions.push(vk::EXT_DEBUG_UTILS_EXTENSION.name.as_ptr());
        }

        // Create
        let mut info = vk::InstanceCreateInfo::builder()
            .application_info(&application_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .flags(flags);

        let mut debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .user_callback(Some(debug_callback));

        if validation {
            info = info.push_next(&mut debug_info);
        }

        let instance = entry
            .create_instance(&info, None)
            .init_failed(Subsystem::Instance, "create instance")?;

        // Messenger
        if validation {
            context.messenger = instance
                .create_debug_utils_messenger_ext(&debug_info, None)
                .init_failed(Subsystem::Instance, "create debug messenger")?;
        }

        // Surface
        context.surface = vk_window::create_surface(&instance, window, window)
            .init_failed(Subsystem::Surface, "create surface")?;

        Ok(VulkanInstance {
            vk_instance: instance,
            validation,
        })
    }

    /// Destroys the surface, the messenger and the instance, in that order.
    pub unsafe fn destroy(&mut self, context: &mut VulkanContext) {
        self.vk_instance.destroy_surface_khr(context.surface, None);
        if self.validation {
            self.vk_instance
                .destroy_debug_utils_messenger_ext(context.messenger, None);
        }
        self.vk_instance.destroy_instance(None);
    }
}

extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    let data = unsafe { *data };
    let message = unsafe { CStr::from_ptr(data.message) }.to_string_lossy();

    if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        error!("({:?}) {}", type_, message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        warn!("({:?}) {}", type_, message);
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        debug!("({:?}) {}", type_, message);
    } else {
        trace!("({:?}) {}", type_, message);
    }

    vk::FALSE
}
