use std::path::PathBuf;

use vulkanalia::vk;

/// Start-up configuration for the engine and its window.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    /// Surface format picked when the surface offers it.
    pub preferred_format: vk::SurfaceFormatKHR,
    /// Low-latency mode used when available; FIFO otherwise.
    pub preferred_present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
    pub validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Mix Engine".to_string(),
            width: 1280,
            height: 720,
            min_width: 640,
            min_height: 480,
            vertex_shader: PathBuf::from("shaders/vert.spv"),
            fragment_shader: PathBuf::from("shaders/frag.spv"),
            preferred_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            preferred_present_mode: vk::PresentModeKHR::MAILBOX,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            validation: cfg!(debug_assertions),
        }
    }
}

impl EngineConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_shaders(mut self, vertex: impl Into<PathBuf>, fragment: impl Into<PathBuf>) -> Self {
        self.vertex_shader = vertex.into();
        self.fragment_shader = fragment.into();
        self
    }

    pub fn with_present_mode(mut self, mode: vk::PresentModeKHR) -> Self {
        self.preferred_present_mode = mode;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_setup() {
        let config = EngineConfig::default();
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!((config.min_width, config.min_height), (640, 480));
        assert_eq!(config.preferred_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(config.preferred_present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.vertex_shader, PathBuf::from("shaders/vert.spv"));
    }

    #[test]
    fn builders_override_fields() {
        let config = EngineConfig::default()
            .with_title("demo")
            .with_size(800, 600)
            .with_shaders("a.spv", "b.spv")
            .with_present_mode(vk::PresentModeKHR::FIFO)
            .with_validation(false);
        assert_eq!(config.title, "demo");
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.fragment_shader, PathBuf::from("b.spv"));
        assert_eq!(config.preferred_present_mode, vk::PresentModeKHR::FIFO);
        assert!(!config.validation);
    }
}
