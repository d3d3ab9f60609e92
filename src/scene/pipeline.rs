use std::sync::Arc;

use super::ItemList;
use crate::renderer::RenderPass;
use crate::vulkan::ClearValue;
use crate::{AshError, Result};

/// A render pass in the scene pipeline with the item lists drawn in each of
/// its subpasses.
pub struct SceneRenderPass {
    render_pass: Arc<RenderPass>,
    framebuffer: String,
    clear_values: Vec<ClearValue>,
    draw_lists: Vec<Vec<Arc<dyn ItemList>>>,
}

impl SceneRenderPass {
    /// `draw_lists` holds one entry per subpass, in subpass order.
    pub fn new(
        render_pass: Arc<RenderPass>,
        framebuffer: impl Into<String>,
        clear_values: Vec<ClearValue>,
        draw_lists: Vec<Vec<Arc<dyn ItemList>>>,
    ) -> Result<Self> {
        if draw_lists.len() != render_pass.subpass_count() as usize {
            return Err(AshError::InvalidArgument(format!(
                "render pass '{}' has {} subpasses but {} draw lists were given",
                render_pass.name(),
                render_pass.subpass_count(),
                draw_lists.len()
            )));
        }
        if !clear_values.is_empty() && clear_values.len() != render_pass.attachments().len() {
            return Err(AshError::InvalidArgument(format!(
                "render pass '{}' needs one clear value per attachment",
                render_pass.name()
            )));
        }

        Ok(Self {
            render_pass,
            framebuffer: framebuffer.into(),
            clear_values,
            draw_lists,
        })
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    /// Name of the view framebuffer rendered into.
    pub fn framebuffer(&self) -> &str {
        &self.framebuffer
    }

    pub fn clear_values(&self) -> &[ClearValue] {
        &self.clear_values
    }

    pub fn draw_lists(&self) -> &[Vec<Arc<dyn ItemList>>] {
        &self.draw_lists
    }

    pub(crate) fn item_lists(&self) -> impl Iterator<Item = &Arc<dyn ItemList>> {
        self.draw_lists.iter().flatten()
    }
}

/// One step of the scene pipeline, executed in declaration order.
pub enum ScenePipelineItem {
    RenderPass(SceneRenderPass),
    Compute(Arc<dyn ItemList>),
}

impl ScenePipelineItem {
    pub(crate) fn item_lists(&self) -> Box<dyn Iterator<Item = &Arc<dyn ItemList>> + '_> {
        match self {
            ScenePipelineItem::RenderPass(render_pass) => Box::new(render_pass.item_lists()),
            ScenePipelineItem::Compute(list) => Box::new(std::iter::once(list)),
        }
    }
}
