use crate::renderer::CommandBuffer;
use crate::Result;

use super::{Scene, View};

/// A list of drawable or compute items owned by the application.
///
/// The scene calls [`update`](Self::update) once per frame and
/// [`commit`](Self::commit) each time a view is drawn. Implementations are
/// shared with recording threads, so interior state must be synchronized.
pub trait ItemList: Send + Sync {
    fn name(&self) -> &str;

    /// Lists that only prepare shared data return `false` and are committed
    /// without a command buffer.
    fn needs_command_buffer(&self) -> bool {
        true
    }

    fn update(&self, _scene: &Scene, _time: f64) {}

    /// Whether [`pre_render_pass`](Self::pre_render_pass) records anything.
    fn has_pre_render_pass(&self) -> bool {
        false
    }

    /// Work that must run before the render pass the list draws in begins,
    /// such as compute dispatches or query resets.
    fn pre_render_pass(&self, _view: &View, _command_buffer: &mut CommandBuffer) -> Result<()> {
        Ok(())
    }

    fn commit(&self, view: &View, command_buffer: Option<&mut CommandBuffer>) -> Result<()>;
}
