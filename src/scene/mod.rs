//! Scene drawing on top of the lifecycle core.

mod item_list;
mod pipeline;
#[allow(clippy::module_inception)]
mod scene;
mod thread_manager;
mod view;

pub use item_list::ItemList;
pub use pipeline::{ScenePipelineItem, SceneRenderPass};
pub use scene::Scene;
pub use thread_manager::SceneThreadManager;
pub use view::View;
