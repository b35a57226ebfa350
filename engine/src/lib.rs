//! A small Vulkan engine: swapchain management, frames in flight, textured
//! objects drawn by one or more graphics pipelines.
//!
//! [`Engine`] owns the window and event loop and drives [`FrameLoop`] against
//! a [`VulkanRenderer`] every redraw. Pipelines and objects are registered
//! through the setup callback handed to [`Engine::new`].

use anyhow::{anyhow, Result};
use log::*;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

pub mod config;
pub mod error;
pub mod frame;
pub mod registry;
pub mod texture;
pub mod vulkan;

pub use config::EngineConfig;
pub use error::{EngineError, Subsystem};
pub use frame::{FrameBackend, FrameLoop, FrameOutcome, FrameSignals, Recreation};
pub use glam;
pub use registry::{ObjectId, PipelineId};
pub use texture::TextureData;
pub use vulkan::{VulkanRenderer, MAX_FRAMES_IN_FLIGHT};

#[derive(Debug)]
pub struct Engine {
    window: Window,
    renderer: Option<VulkanRenderer>,
    event_loop: EventLoop<()>,
}

impl Engine {
    pub fn new<F>(config: EngineConfig, setup: F) -> Result<Engine>
    where
        F: FnOnce(&mut VulkanRenderer) -> Result<()>,
    {
        // Window
        let event_loop = EventLoop::new().map_err(|e| {
            anyhow!(EngineError::Initialization(
                Subsystem::Window,
                format!("create event loop: {e}"),
            ))
        })?;
        let window = WindowBuilder::new()
            .with_title(config.title.as_str())
            .with_inner_size(LogicalSize::new(config.width, config.height))
            .with_min_inner_size(LogicalSize::new(config.min_width, config.min_height))
            .build(&event_loop)
            .map_err(|e| {
                anyhow!(EngineError::Initialization(
                    Subsystem::Window,
                    format!("create window: {e}"),
                ))
            })?;

        let renderer = unsafe { VulkanRenderer::new(&window, &config, setup)? };

        Ok(Engine {
            window,
            renderer: Some(renderer),
            event_loop,
        })
    }

    /// Runs frames until the window closes or a frame fails. A failure is
    /// logged with its subsystem, the renderer is torn down and the error is
    /// returned.
    pub fn run(self) -> Result<()> {
        let Engine {
            window,
            mut renderer,
            event_loop,
        } = self;

        let mut frames = FrameLoop::new();
        let mut signals = FrameSignals::default();
        let mut failure = None;

        let result = event_loop.run(|event, elwt| match event {
            // Request a redraw when all events were processed.
            Event::AboutToWait => window.request_redraw(),
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::RedrawRequested if !elwt.exiting() => {
                    let Some(renderer) = renderer.as_mut() else {
                        return;
                    };
                    if signals.minimized {
                        // Rendering may have been suspended without a zero-size resize event.
                        let PhysicalSize { width, height } = window.inner_size();
                        if width > 0 && height > 0 {
                            signals.minimized = false;
                            signals.framebuffer_resized = true;
                            renderer.set_drawable_size(width, height);
                        }
                    }
                    match frames.draw_frame(renderer, signals) {
                        Ok((outcome, next)) => {
                            trace!("Frame: {:?}", outcome);
                            signals = next;
                        }
                        Err(error) => {
                            report_fatal(&error);
                            failure = Some(error);
                            elwt.exit();
                        }
                    }
                }
                WindowEvent::Resized(PhysicalSize { width, height }) => {
                    if width == 0 || height == 0 {
                        signals.minimized = true;
                    } else {
                        signals.minimized = false;
                        signals.framebuffer_resized = true;
                        if let Some(renderer) = renderer.as_mut() {
                            renderer.set_drawable_size(width, height);
                        }
                    }
                    debug!("Resized to {}x{}.", width, height);
                }
                WindowEvent::CloseRequested => elwt.exit(),
                _ => {}
            },
            Event::LoopExiting => shutdown(&mut renderer),
            _ => {}
        });

        shutdown(&mut renderer);
        info!(
            "Presented {} frame(s), recreated the swapchain {} time(s).",
            frames.frames_presented(),
            frames.recreations()
        );

        if let Some(error) = failure {
            return Err(error);
        }
        result.map_err(|e| {
            anyhow!(EngineError::Initialization(
                Subsystem::Window,
                format!("event loop: {e}"),
            ))
        })
    }
}

fn report_fatal(error: &anyhow::Error) {
    match error::subsystem_of(error) {
        Some(subsystem) => error!("Fatal error in {}: {:#}", subsystem, error),
        None => error!("Fatal error: {:#}", error),
    }
}

fn shutdown(renderer: &mut Option<VulkanRenderer>) {
    if let Some(mut renderer) = renderer.take() {
        unsafe { renderer.destroy() };
    }
}
