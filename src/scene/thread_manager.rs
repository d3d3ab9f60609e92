//! Parallel recording of a scene's item lists.
//!
//! Each item list becomes one work unit. Units are recorded on a rayon pool
//! into per-worker command buffer pools, collected over a channel and then
//! replayed on the calling thread in the order the scene declares them, so
//! render pass begin/next/end calls stay one unbroken sequence.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{ItemList, Scene, ScenePipelineItem, SceneRenderPass, View};
use crate::renderer::{
    CommandBuffer, CommandBufferPool, CommandBufferUsage, RecordedCommands, RenderContext,
    RenderPassInheritance, RenderPassTarget,
};
use crate::vulkan::SubpassContents;
use crate::{AshError, Result};

/// Command buffer pools claimed by one worker thread.
struct WorkerPools {
    primary: CommandBufferPool,
    secondary: CommandBufferPool,
}

impl WorkerPools {
    fn new(ctx: &Arc<RenderContext>) -> Result<Self> {
        Ok(Self {
            primary: CommandBufferPool::new(ctx, CommandBufferUsage::Standard)?,
            secondary: CommandBufferPool::new(ctx, CommandBufferUsage::Secondary)?,
        })
    }
}

enum WorkKind {
    /// Shared or compute list recorded into a primary buffer.
    Primary(Arc<dyn ItemList>),
    Subpass {
        list: Arc<dyn ItemList>,
        inheritance: RenderPassInheritance,
    },
}

struct WorkUnit {
    slot: usize,
    kind: WorkKind,
}

#[derive(Default)]
struct RecordedUnit {
    prelude: Option<RecordedCommands>,
    commands: Option<RecordedCommands>,
}

enum ReplayStep<'a> {
    RenderPass {
        scene_pass: &'a SceneRenderPass,
        target: RenderPassTarget,
    },
    Compute,
}

/// Records scenes on a fixed set of worker threads.
pub struct SceneThreadManager {
    ctx: Arc<RenderContext>,
    pool: ThreadPool,
    workers: Vec<Mutex<Option<WorkerPools>>>,
    last_frame: Mutex<Option<u64>>,
}

impl SceneThreadManager {
    /// Uses the worker count from the renderer config.
    pub fn new(ctx: &Arc<RenderContext>) -> Result<Self> {
        Self::with_threads(ctx, ctx.config().worker_count())
    }

    pub fn with_threads(ctx: &Arc<RenderContext>, threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(AshError::InvalidArgument(
                "scene thread manager needs at least one thread".into(),
            ));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("Scene-Draw-{index}"))
            .build()
            .map_err(|e| AshError::InvalidState(format!("failed to start scene threads: {e}")))?;
        debug!("Scene thread manager started with {threads} threads");

        Ok(Self {
            ctx: Arc::clone(ctx),
            pool,
            workers: (0..threads).map(|_| Mutex::new(None)).collect(),
            last_frame: Mutex::new(None),
        })
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Workers that have claimed their command buffer pools.
    pub fn claimed_pools(&self) -> usize {
        self.workers
            .iter()
            .filter(|worker| worker.lock().is_some())
            .count()
    }

    /// Records `scene` for `view` in parallel and replays it into
    /// `command_buffer`.
    pub fn draw(
        &self,
        scene: &Scene,
        view: &View,
        command_buffer: &mut CommandBuffer,
    ) -> Result<()> {
        self.begin_frame()?;

        // Shared groups run one after the other, each a full barrier.
        let mut shared = Vec::with_capacity(scene.shared_items().len());
        for group in scene.shared_items() {
            let units = group
                .iter()
                .enumerate()
                .map(|(slot, list)| WorkUnit {
                    slot,
                    kind: WorkKind::Primary(Arc::clone(list)),
                })
                .collect();
            shared.push(self.record(units, view));
        }

        // Targets are resolved here so every worker inherits the same
        // render pass data and framebuffer.
        let mut steps = Vec::with_capacity(scene.pipeline().len());
        let mut units = Vec::new();
        for item in scene.pipeline() {
            match item {
                ScenePipelineItem::RenderPass(scene_pass) => {
                    let framebuffer = view.framebuffer(scene_pass.framebuffer())?;
                    let target = RenderPassTarget::new(scene_pass.render_pass(), framebuffer)?;
                    for (subpass, lists) in scene_pass.draw_lists().iter().enumerate() {
                        for list in lists {
                            units.push(WorkUnit {
                                slot: units.len(),
                                kind: WorkKind::Subpass {
                                    list: Arc::clone(list),
                                    inheritance: target.inheritance(subpass as u32),
                                },
                            });
                        }
                    }
                    steps.push(ReplayStep::RenderPass { scene_pass, target });
                }
                ScenePipelineItem::Compute(list) => {
                    units.push(WorkUnit {
                        slot: units.len(),
                        kind: WorkKind::Primary(Arc::clone(list)),
                    });
                    steps.push(ReplayStep::Compute);
                }
            }
        }
        let recorded = self.record(units, view);

        for group in shared {
            for unit in group {
                if let Some(commands) = unit.commands {
                    command_buffer.execute(commands)?;
                }
            }
        }

        let mut recorded = recorded.into_iter();
        for step in steps {
            match step {
                ReplayStep::RenderPass { scene_pass, target } => {
                    let unit_count = scene_pass.draw_lists().iter().map(Vec::len).sum();
                    let mut units: Vec<RecordedUnit> = recorded.by_ref().take(unit_count).collect();
                    for unit in &mut units {
                        if let Some(prelude) = unit.prelude.take() {
                            command_buffer.execute(prelude)?;
                        }
                    }

                    command_buffer.begin_target(
                        &target,
                        scene_pass.clear_values(),
                        SubpassContents::SecondaryCommandBuffers,
                    )?;
                    let mut units = units.into_iter();
                    let last = scene_pass.draw_lists().len().saturating_sub(1);
                    for (subpass, lists) in scene_pass.draw_lists().iter().enumerate() {
                        for unit in units.by_ref().take(lists.len()) {
                            if let Some(commands) = unit.commands {
                                command_buffer.execute(commands)?;
                            }
                        }
                        if subpass != last {
                            command_buffer.next_subpass(SubpassContents::SecondaryCommandBuffers)?;
                        }
                    }
                    command_buffer.end_render_pass()?;
                }
                ReplayStep::Compute => {
                    if let Some(commands) = recorded.next().and_then(|unit| unit.commands) {
                        command_buffer.execute(commands)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Recycles the worker pools once per renderer frame.
    fn begin_frame(&self) -> Result<()> {
        let frame = self.ctx.frame_number();
        let mut last_frame = self.last_frame.lock();
        if *last_frame == Some(frame) {
            return Ok(());
        }
        *last_frame = Some(frame);

        for worker in &self.workers {
            if let Some(pools) = worker.lock().as_mut() {
                pools.primary.reset()?;
                pools.secondary.reset()?;
            }
        }
        Ok(())
    }

    /// Records `units` on the pool and returns the results in slot order.
    fn record(&self, units: Vec<WorkUnit>, view: &View) -> Vec<RecordedUnit> {
        let mut results: Vec<RecordedUnit> =
            (0..units.len()).map(|_| RecordedUnit::default()).collect();
        if units.is_empty() {
            return results;
        }

        let (sender, receiver) = crossbeam_channel::unbounded();
        self.pool.scope(|scope| {
            for unit in units {
                let sender = sender.clone();
                scope.spawn(move |_| {
                    let slot = unit.slot;
                    let result = self.record_unit(unit, view);
                    // The receiver outlives the scope.
                    let _ = sender.send((slot, result));
                });
            }
        });
        drop(sender);

        for (slot, result) in receiver.try_iter() {
            match result {
                Ok(unit) => results[slot] = unit,
                Err(err) => warn!("Skipping scene work unit {slot}: {err}"),
            }
        }
        results
    }

    fn record_unit(&self, unit: WorkUnit, view: &View) -> Result<RecordedUnit> {
        let worker = rayon::current_thread_index().unwrap_or(0) % self.workers.len();
        let mut claimed = self.workers[worker].lock();
        if claimed.is_none() {
            *claimed = Some(WorkerPools::new(&self.ctx)?);
            debug!("Scene worker {worker} claimed its command buffer pools");
        }
        let Some(pools) = claimed.as_mut() else {
            return Err(AshError::InvalidState("worker pools missing".into()));
        };

        match unit.kind {
            WorkKind::Primary(list) => {
                if !list.needs_command_buffer() {
                    if let Err(err) = list.commit(view, None) {
                        warn!("Item list '{}' failed to commit: {err}", list.name());
                    }
                    return Ok(RecordedUnit::default());
                }

                let command_buffer = &mut pools.primary.create_command_buffers(1)?[0];
                if let Err(err) = list.commit(view, Some(&mut *command_buffer)) {
                    warn!("Item list '{}' failed to commit: {err}", list.name());
                }
                command_buffer.end()?;
                Ok(RecordedUnit {
                    prelude: None,
                    commands: Some(command_buffer.take_recorded()),
                })
            }
            WorkKind::Subpass { list, inheritance } => {
                // The prelude and the subpass buffer are recorded back to back
                // on this worker.
                let prelude = if list.has_pre_render_pass() {
                    let command_buffer = &mut pools.primary.create_command_buffers(1)?[0];
                    if let Err(err) = list.pre_render_pass(view, command_buffer) {
                        warn!("Pre-render pass of '{}' failed: {err}", list.name());
                    }
                    command_buffer.end()?;
                    Some(command_buffer.take_recorded())
                } else {
                    None
                };

                let command_buffer = &mut pools.secondary.create_command_buffers(1)?[0];
                command_buffer.begin_secondary(Some(&inheritance))?;
                if let Err(err) = list.commit(view, Some(&mut *command_buffer)) {
                    warn!("Item list '{}' failed to commit: {err}", list.name());
                }
                command_buffer.end()?;
                Ok(RecordedUnit {
                    prelude,
                    commands: Some(command_buffer.take_recorded()),
                })
            }
        }
    }
}
