use std::collections::HashMap;
use std::sync::Arc;

use crate::renderer::Framebuffer;
use crate::{AshError, Result};

/// What a scene is drawn into: named framebuffers plus the view extent.
pub struct View {
    name: String,
    width: u32,
    height: u32,
    framebuffers: HashMap<String, Arc<Framebuffer>>,
}

impl View {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            framebuffers: HashMap::new(),
        }
    }

    pub fn with_framebuffer(
        mut self,
        name: impl Into<String>,
        framebuffer: Arc<Framebuffer>,
    ) -> Self {
        self.set_framebuffer(name, framebuffer);
        self
    }

    /// Replaces the framebuffer bound to `name`, e.g. after a resize.
    pub fn set_framebuffer(&mut self, name: impl Into<String>, framebuffer: Arc<Framebuffer>) {
        self.framebuffers.insert(name.into(), framebuffer);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn framebuffer(&self, name: &str) -> Result<&Arc<Framebuffer>> {
        self.framebuffers.get(name).ok_or_else(|| {
            AshError::InvalidArgument(format!(
                "view '{}' has no framebuffer named '{name}'",
                self.name
            ))
        })
    }
}
