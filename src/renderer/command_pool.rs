//! Low-level command buffer chunks and the user-visible command buffer pool.

use std::sync::Arc;

use log::{debug, warn};

use super::command_buffer::{CommandBuffer, CommandBufferUsage};
use super::config::FRAME_DELAY;
use super::context::RenderContext;
use super::deletion::DeferredResource;
use super::resource::{GpuResource, ResourceUsage};
use crate::vulkan::{CommandBufferHandle, CommandBufferLevel, CommandPoolHandle, GpuDevice};
use crate::Result;

/// Low-level command buffers carved out of one pool in fixed-size chunks.
///
/// Buffers are handed out round-robin through the chunks already allocated
/// before a new chunk is requested from the device. [`reset`](Self::reset)
/// rewinds the cursors; the owner resets the device pool itself.
pub struct CommandBufferChunks {
    pool: CommandPoolHandle,
    level: CommandBufferLevel,
    chunk_size: u32,
    chunks: Vec<Vec<CommandBufferHandle>>,
    active_chunk: usize,
    next_buffer: usize,
}

impl CommandBufferChunks {
    pub fn new(pool: CommandPoolHandle, level: CommandBufferLevel, chunk_size: u32) -> Self {
        Self {
            pool,
            level,
            chunk_size: chunk_size.max(1),
            chunks: Vec::new(),
            active_chunk: 0,
            next_buffer: 0,
        }
    }

    pub fn pool(&self) -> CommandPoolHandle {
        self.pool
    }

    pub fn level(&self) -> CommandBufferLevel {
        self.level
    }

    /// Returns the next unused buffer. On failure the cursors are unchanged.
    pub fn next(&mut self, device: &dyn GpuDevice) -> Result<CommandBufferHandle> {
        if self.active_chunk < self.chunks.len()
            && self.next_buffer >= self.chunks[self.active_chunk].len()
        {
            self.active_chunk += 1;
            self.next_buffer = 0;
        }

        if self.active_chunk == self.chunks.len() {
            let allocated =
                device.allocate_command_buffers(self.pool, self.level, self.chunk_size);
            let chunk = match allocated {
                Ok(chunk) => chunk,
                Err(err) => {
                    // Step back so the cursor still points past the last handed-out buffer.
                    if self.active_chunk > 0 {
                        self.active_chunk -= 1;
                        self.next_buffer = self.chunks[self.active_chunk].len();
                    }
                    return Err(err);
                }
            };
            debug!(
                "Allocated chunk of {} {:?} command buffers from {:?}",
                chunk.len(),
                self.level,
                self.pool
            );
            self.chunks.push(chunk);
        }

        let buffer = self.chunks[self.active_chunk][self.next_buffer];
        self.next_buffer += 1;
        Ok(buffer)
    }

    pub fn reset(&mut self) {
        self.active_chunk = 0;
        self.next_buffer = 0;
    }

    /// Buffers allocated from the device so far.
    pub fn allocated(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Buffers handed out since the last reset.
    pub fn in_use(&self) -> usize {
        let full: usize = self
            .chunks
            .iter()
            .take(self.active_chunk)
            .map(Vec::len)
            .sum();
        full + self.next_buffer.min(
            self.chunks
                .get(self.active_chunk)
                .map(Vec::len)
                .unwrap_or(0),
        )
    }
}

/// Device command pool as a deferrable resource.
pub struct CommandPoolResource {
    pub(crate) usage: ResourceUsage,
    pool: CommandPoolHandle,
}

impl CommandPoolResource {
    pub(crate) fn create(device: &dyn GpuDevice, transient: bool) -> Result<Arc<Self>> {
        let pool = device.create_command_pool(transient)?;
        Ok(Arc::new(Self {
            usage: ResourceUsage::new(),
            pool,
        }))
    }

    pub fn handle(&self) -> CommandPoolHandle {
        self.pool
    }

    pub(crate) fn destroy(&self, device: &dyn GpuDevice) {
        device.destroy_command_pool(self.pool);
    }
}

impl GpuResource for CommandPoolResource {
    fn usage(&self) -> &ResourceUsage {
        &self.usage
    }
}

struct PoolFrame {
    resource: Arc<CommandPoolResource>,
    buffers: Vec<CommandBuffer>,
    active: usize,
}

/// Set of command buffers that are recycled across frames.
///
/// The pool owns [`FRAME_DELAY`] device pools. [`reset`](Self::reset) moves
/// to the next one, which is recycled once the GPU is done with the work that
/// was recorded into it `FRAME_DELAY` resets ago.
pub struct CommandBufferPool {
    ctx: Arc<RenderContext>,
    usage: CommandBufferUsage,
    frames: Vec<PoolFrame>,
    current: usize,
}

impl CommandBufferPool {
    pub fn new(ctx: &Arc<RenderContext>, usage: CommandBufferUsage) -> Result<Self> {
        let mut frames = Vec::with_capacity(FRAME_DELAY);
        for _ in 0..FRAME_DELAY {
            match CommandPoolResource::create(ctx.device(), !usage.is_multi_frame()) {
                Ok(resource) => frames.push(PoolFrame {
                    resource,
                    buffers: Vec::new(),
                    active: 0,
                }),
                Err(err) => {
                    for frame in frames {
                        frame.resource.destroy(ctx.device());
                    }
                    return Err(err);
                }
            }
        }

        Ok(Self {
            ctx: Arc::clone(ctx),
            usage,
            frames,
            current: 0,
        })
    }

    pub fn usage(&self) -> CommandBufferUsage {
        self.usage
    }

    /// Hands out `count` more command buffers for the current frame.
    ///
    /// Buffers left over from the last time this frame was active are
    /// reused before new ones are created.
    pub fn create_command_buffers(&mut self, count: usize) -> Result<&mut [CommandBuffer]> {
        let chunk_size = self.ctx.config().command_buffer_chunk_size;
        let frame = &mut self.frames[self.current];
        let start = frame.active;
        while frame.buffers.len() < start + count {
            let buffer = CommandBuffer::pooled(
                &self.ctx,
                self.usage,
                Arc::clone(&frame.resource),
                chunk_size,
            );
            frame.buffers.push(buffer);
        }
        frame.active = start + count;
        Ok(&mut frame.buffers[start..start + count])
    }

    /// Command buffers handed out for the current frame.
    pub fn command_buffers(&mut self) -> &mut [CommandBuffer] {
        let frame = &mut self.frames[self.current];
        &mut frame.buffers[..frame.active]
    }

    /// Advances to the next frame's device pool and recycles it.
    ///
    /// Blocks until the GPU has finished with the work last recorded into
    /// that pool. This is the only synchronous wait in the recording path.
    /// On a timeout the pool stays on the current frame and the reset can be
    /// retried.
    pub fn reset(&mut self) -> Result<()> {
        let next = (self.current + 1) % self.frames.len();
        let frame = &mut self.frames[next];

        for buffer in &mut frame.buffers {
            buffer.clear_used_resources();
        }

        frame
            .resource
            .usage
            .wait_until_not_in_use(self.ctx.submits(), self.ctx.config().wait_timeout)?;
        self.ctx.device().reset_command_pool(frame.resource.handle())?;

        for buffer in &mut frame.buffers {
            buffer.recycle();
        }
        frame.active = 0;
        self.current = next;
        Ok(())
    }
}

impl Drop for CommandBufferPool {
    fn drop(&mut self) {
        for frame in self.frames.drain(..) {
            let PoolFrame {
                resource,
                mut buffers,
                ..
            } = frame;
            for buffer in &mut buffers {
                buffer.clear_used_resources();
            }
            drop(buffers);
            if resource.usage.command_buffer_count() > 0 {
                warn!("Command buffer pool dropped while its buffers are still referenced");
            }
            self.ctx
                .queue_for_deletion(DeferredResource::CommandPool(resource));
        }
    }
}
