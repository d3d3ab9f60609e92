use std::sync::Arc;

use log::{debug, warn};

use super::{ItemList, ScenePipelineItem, SceneThreadManager, View};
use crate::renderer::{CommandBuffer, Renderer};
use crate::vulkan::SubpassContents;
use crate::{AshError, Result};

/// Item lists and the pipeline that orders them into passes.
pub struct Scene {
    shared_items: Vec<Vec<Arc<dyn ItemList>>>,
    pipeline: Vec<ScenePipelineItem>,
}

impl Scene {
    /// `shared_items` are groups committed before the pipeline, one group
    /// after the other.
    pub fn new(
        shared_items: Vec<Vec<Arc<dyn ItemList>>>,
        pipeline: Vec<ScenePipelineItem>,
    ) -> Result<Self> {
        if pipeline.is_empty() && shared_items.iter().all(Vec::is_empty) {
            return Err(AshError::InvalidArgument("scene has no item lists".into()));
        }
        for item in &pipeline {
            if let ScenePipelineItem::RenderPass(render_pass) = item {
                if render_pass.framebuffer().is_empty() {
                    return Err(AshError::InvalidArgument(format!(
                        "render pass '{}' has no framebuffer name",
                        render_pass.render_pass().name()
                    )));
                }
            }
        }

        Ok(Self {
            shared_items,
            pipeline,
        })
    }

    pub fn shared_items(&self) -> &[Vec<Arc<dyn ItemList>>] {
        &self.shared_items
    }

    pub fn pipeline(&self) -> &[ScenePipelineItem] {
        &self.pipeline
    }

    /// Every item list in logical order: shared groups, then the pipeline.
    pub fn item_lists(&self) -> impl Iterator<Item = &Arc<dyn ItemList>> {
        self.shared_items
            .iter()
            .flatten()
            .chain(self.pipeline.iter().flat_map(ScenePipelineItem::item_lists))
    }

    /// Per-frame update. Call before drawing any view of the scene.
    pub fn update(&self, time: f64) {
        for list in self.item_lists() {
            list.update(self, time);
        }
    }

    /// Draws `view` into `command_buffer`, in parallel when a thread
    /// manager is given.
    pub fn draw(
        &self,
        view: &View,
        command_buffer: &mut CommandBuffer,
        threads: Option<&SceneThreadManager>,
    ) -> Result<()> {
        if let Some(threads) = threads {
            return threads.draw(self, view, command_buffer);
        }

        for list in self.shared_items.iter().flatten() {
            commit_list(list.as_ref(), view, command_buffer);
        }

        for item in &self.pipeline {
            match item {
                ScenePipelineItem::RenderPass(scene_pass) => {
                    let framebuffer = view.framebuffer(scene_pass.framebuffer())?;
                    for list in scene_pass.item_lists() {
                        if list.has_pre_render_pass() {
                            if let Err(err) = list.pre_render_pass(view, command_buffer) {
                                warn!("Pre-render pass of '{}' failed: {err}", list.name());
                            }
                        }
                    }

                    let render_pass = scene_pass.render_pass();
                    command_buffer.begin_render_pass(
                        render_pass,
                        framebuffer,
                        scene_pass.clear_values(),
                        SubpassContents::Inline,
                    )?;
                    let last = scene_pass.draw_lists().len().saturating_sub(1);
                    for (subpass, lists) in scene_pass.draw_lists().iter().enumerate() {
                        for list in lists {
                            commit_list(list.as_ref(), view, command_buffer);
                        }
                        if subpass != last {
                            command_buffer.next_subpass(SubpassContents::Inline)?;
                        }
                    }
                    command_buffer.end_render_pass()?;
                }
                ScenePipelineItem::Compute(list) => {
                    commit_list(list.as_ref(), view, command_buffer);
                }
            }
        }
        debug!("Drew view '{}' on the render thread", view.name());
        Ok(())
    }

    /// Draws into the renderer's main command buffer.
    pub fn draw_main(
        &self,
        renderer: &Renderer,
        view: &View,
        threads: Option<&SceneThreadManager>,
    ) -> Result<()> {
        let mut main = renderer.main_command_buffer();
        self.draw(view, &mut main, threads)
    }
}

/// A failed commit skips the list's draws; the rest of the frame goes on.
fn commit_list(list: &dyn ItemList, view: &View, command_buffer: &mut CommandBuffer) {
    let command_buffer = list.needs_command_buffer().then_some(command_buffer);
    if let Err(err) = list.commit(view, command_buffer) {
        warn!("Item list '{}' failed to commit: {err}", list.name());
    }
}
