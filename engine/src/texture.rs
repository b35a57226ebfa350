use std::path::Path;

use anyhow::{anyhow, Result};
use log::*;

use crate::error::{EngineError, ErrorContext, Subsystem};

/// Decoded RGBA8 pixels handed to the GPU as a sampled texture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureData {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl TextureData {
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(anyhow!(EngineError::ResourceCreation(
                Subsystem::Allocator,
                format!(
                    "texture {width}x{height} needs {expected} bytes, got {}",
                    pixels.len()
                ),
            )));
        }
        Ok(Self { width, height, pixels })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .creation_failed(Subsystem::Io, &format!("decode texture `{}`", path.display()))?
            .into_rgba8();
        let (width, height) = image.dimensions();
        debug!("Loaded texture `{}` ({}x{}).", path.display(), width, height);
        Self::from_rgba(width, height, image.into_raw())
    }

    /// Two-colour checkerboard with `cells` squares per side, at least one
    /// pixel wide.
    pub fn checkerboard(size: u32, cells: u32) -> Self {
        let size = size.max(1);
        let cell = (size / cells.max(1)).max(1);
        let mut pixels = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let light = ((x / cell) + (y / cell)) % 2 == 0;
                let value = if light { 0xee } else { 0x33 };
                pixels.extend_from_slice(&[value, value, value, 0xff]);
            }
        }
        Self {
            width: size,
            height: size,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_size(&self) -> u64 {
        self.pixels.len() as u64
    }
}
