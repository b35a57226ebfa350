use std::fmt;

use thiserror::Error;

/// The engine subsystem an error originated from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Subsystem {
    Window,
    Instance,
    Surface,
    Device,
    Swapchain,
    Synchronizer,
    Allocator,
    Pipeline,
    Renderer,
    Io,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subsystem::Window => "window",
            Subsystem::Instance => "instance",
            Subsystem::Surface => "surface",
            Subsystem::Device => "device",
            Subsystem::Swapchain => "swapchain",
            Subsystem::Synchronizer => "synchronizer",
            Subsystem::Allocator => "allocator",
            Subsystem::Pipeline => "pipeline",
            Subsystem::Renderer => "renderer",
            Subsystem::Io => "io",
        };
        f.write_str(name)
    }
}

/// Fatal engine failures.
///
/// A stale or suboptimal surface is never reported through this type; it is
/// handled by recreating the swapchain.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("[{0}] initialization failed: {1}")]
    Initialization(Subsystem, String),
    #[error("[{0}] resource creation failed: {1}")]
    ResourceCreation(Subsystem, String),
    #[error("[{0}] synchronization failed: {1}")]
    Synchronization(Subsystem, String),
    #[error("[{0}] presentation failed: {1}")]
    Presentation(Subsystem, String),
}

impl EngineError {
    pub fn subsystem(&self) -> Subsystem {
        match self {
            EngineError::Initialization(s, _)
            | EngineError::ResourceCreation(s, _)
            | EngineError::Synchronization(s, _)
            | EngineError::Presentation(s, _) => *s,
        }
    }
}

/// Tags backend errors with their place in the engine's error taxonomy.
pub trait ErrorContext<T> {
    fn init_failed(self, subsystem: Subsystem, what: &str) -> Result<T, EngineError>;
    fn creation_failed(self, subsystem: Subsystem, what: &str) -> Result<T, EngineError>;
    fn sync_failed(self, subsystem: Subsystem, what: &str) -> Result<T, EngineError>;
    fn present_failed(self, subsystem: Subsystem, what: &str) -> Result<T, EngineError>;
}

impl<T, E: fmt::Display> ErrorContext<T> for Result<T, E> {
    fn init_failed(self, subsystem: Subsystem, what: &str) -> Result<T, EngineError> {
        self.map_err(|e| EngineError::Initialization(subsystem, format!("{what}: {e}")))
    }

    fn creation_failed(self, subsystem: Subsystem, what: &str) -> Result<T, EngineError> {
        self.map_err(|e| EngineError::ResourceCreation(subsystem, format!("{what}: {e}")))
    }

    fn sync_failed(self, subsystem: Subsystem, what: &str) -> Result<T, EngineError> {
        self.map_err(|e| EngineError::Synchronization(subsystem, format!("{what}: {e}")))
    }

    fn present_failed(self, subsystem: Subsystem, what: &str) -> Result<T, EngineError> {
        self.map_err(|e| EngineError::Presentation(subsystem, format!("{what}: {e}")))
    }
}

/// Finds the originating subsystem of a fatal error, if it carries one.
pub fn subsystem_of(error: &anyhow::Error) -> Option<Subsystem> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<EngineError>())
        .map(EngineError::subsystem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn display_names_subsystem() {
        let error = EngineError::ResourceCreation(Subsystem::Allocator, "no memory type".into());
        assert_eq!(
            error.to_string(),
            "[allocator] resource creation failed: no memory type"
        );
    }

    #[test]
    fn context_maps_into_taxonomy() {
        let result: Result<(), &str> = Err("VK_TIMEOUT");
        let error = result
            .sync_failed(Subsystem::Synchronizer, "wait for in-flight fence")
            .unwrap_err();
        assert!(matches!(error, EngineError::Synchronization(Subsystem::Synchronizer, _)));
        assert!(error.to_string().contains("VK_TIMEOUT"));
    }

    #[test]
    fn subsystem_survives_anyhow_context() {
        let error = anyhow::Error::new(EngineError::Presentation(
            Subsystem::Swapchain,
            "device lost".into(),
        ))
        .context("drawing frame");
        assert_eq!(subsystem_of(&error), Some(Subsystem::Swapchain));

        let plain = anyhow::anyhow!("unrelated");
        assert_eq!(subsystem_of(&plain), None);
    }

    #[test]
    fn subsystem_found_through_nested_context() {
        let result: anyhow::Result<()> = Err(EngineError::Initialization(
            Subsystem::Device,
            "no suitable GPU".into(),
        )
        .into());
        let error = result.context("starting engine").unwrap_err();
        assert_eq!(subsystem_of(&error), Some(Subsystem::Device));
    }
}
