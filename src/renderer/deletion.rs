use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::command_pool::CommandPoolResource;
use super::framebuffer::RealFramebuffer;
use super::gpu_resources::{
    BufferResource, DescriptorSetResource, FenceResource, QueryPoolResource, TextureResource,
};
use super::pipeline::Pipeline;
use super::render_pass::RenderPassData;
use super::resource::ResourceUsage;
use super::shader::SamplerList;
use crate::vulkan::GpuDevice;

/// Delay generations kept by the deletion queue.
pub const DELETE_LIST_COUNT: usize = 2;

/// Entries that can be parked without allocating when a delete list fails
/// to grow.
const SPILL_CAPACITY: usize = 64;

/// Every kind of object whose destruction can be deferred.
pub enum DeferredResource {
    Buffer(Arc<BufferResource>),
    Texture(Arc<TextureResource>),
    Framebuffer(Arc<RealFramebuffer>),
    Pipeline(Arc<Pipeline>),
    CommandPool(Arc<CommandPoolResource>),
    RenderPassData(Arc<RenderPassData>),
    Fence(Arc<FenceResource>),
    QueryPool(Arc<QueryPoolResource>),
    DescriptorSet(Arc<DescriptorSetResource>),
    SamplerList(Arc<SamplerList>),
}

impl DeferredResource {
    pub fn kind(&self) -> &'static str {
        match self {
            DeferredResource::Buffer(_) => "buffer",
            DeferredResource::Texture(_) => "texture",
            DeferredResource::Framebuffer(_) => "framebuffer",
            DeferredResource::Pipeline(_) => "pipeline",
            DeferredResource::CommandPool(_) => "command pool",
            DeferredResource::RenderPassData(_) => "render pass data",
            DeferredResource::Fence(_) => "fence",
            DeferredResource::QueryPool(_) => "query pool",
            DeferredResource::DescriptorSet(_) => "descriptor set",
            DeferredResource::SamplerList(_) => "sampler list",
        }
    }

    pub fn usage(&self) -> &ResourceUsage {
        match self {
            DeferredResource::Buffer(resource) => &resource.usage,
            DeferredResource::Texture(resource) => &resource.usage,
            DeferredResource::Framebuffer(resource) => &resource.usage,
            DeferredResource::Pipeline(resource) => &resource.usage,
            DeferredResource::CommandPool(resource) => &resource.usage,
            DeferredResource::RenderPassData(resource) => &resource.usage,
            DeferredResource::Fence(resource) => &resource.usage,
            DeferredResource::QueryPool(resource) => &resource.usage,
            DeferredResource::DescriptorSet(resource) => &resource.usage,
            DeferredResource::SamplerList(resource) => &resource.usage,
        }
    }

    pub(crate) fn destroy(self, device: &dyn GpuDevice) {
        match self {
            DeferredResource::Buffer(resource) => resource.destroy(device),
            DeferredResource::Texture(resource) => resource.destroy(device),
            DeferredResource::Framebuffer(resource) => resource.destroy(device),
            DeferredResource::Pipeline(resource) => resource.destroy(device),
            DeferredResource::CommandPool(resource) => resource.destroy(device),
            DeferredResource::RenderPassData(resource) => resource.destroy(device),
            DeferredResource::Fence(resource) => resource.destroy(device),
            DeferredResource::QueryPool(resource) => resource.destroy(device),
            DeferredResource::DescriptorSet(resource) => resource.destroy(device),
            DeferredResource::SamplerList(resource) => resource.destroy(device),
        }
    }
}

/// Counts reported by a sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub destroyed: usize,
    pub requeued: usize,
}

struct DeletionState {
    lists: [Vec<DeferredResource>; DELETE_LIST_COUNT],
    current: usize,
    spill: Vec<DeferredResource>,
}

/// Ring of delete lists, one per delay generation.
///
/// Resources are appended to the current list. Each sweep rotates the ring
/// and examines the list that has waited a full rotation; anything still in
/// use moves to the now-current list.
pub struct DeletionQueue {
    state: Mutex<DeletionState>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeletionState {
                lists: Default::default(),
                current: 0,
                spill: Vec::with_capacity(SPILL_CAPACITY),
            }),
        }
    }

    /// Appends `resource` to the current generation.
    ///
    /// When the list cannot grow, a resource that is provably idle is
    /// destroyed right away and an in-use one is parked in the preallocated
    /// spill list. Only if that is full as well is the resource handed back
    /// so the caller can wait for it synchronously.
    pub fn queue(
        &self,
        resource: DeferredResource,
        finished_submit: u64,
        device: &dyn GpuDevice,
    ) -> Result<(), DeferredResource> {
        let mut state = self.state.lock();
        let current = state.current;
        if state.lists[current].try_reserve(1).is_ok() {
            state.lists[current].push(resource);
            return Ok(());
        }

        if !resource.usage().is_in_use(finished_submit) {
            drop(state);
            resource.destroy(device);
            return Ok(());
        }

        if state.spill.len() < state.spill.capacity() {
            state.spill.push(resource);
            return Ok(());
        }
        Err(resource)
    }

    /// Appends to the current generation, growing the list if needed.
    pub(crate) fn push_blocking(&self, resource: DeferredResource) {
        let mut state = self.state.lock();
        let current = state.current;
        state.lists[current].push(resource);
    }

    /// Rotates the ring and destroys what is no longer in use.
    pub fn sweep(&self, finished_submit: u64, device: &dyn GpuDevice) -> SweepStats {
        let (expired, spilled) = {
            let mut state = self.state.lock();
            state.current = (state.current + 1) % DELETE_LIST_COUNT;
            let current = state.current;
            let expired = std::mem::take(&mut state.lists[current]);
            let spilled: Vec<_> = state.spill.drain(..).collect();
            (expired, spilled)
        };

        let mut stats = SweepStats::default();
        let mut requeue = Vec::new();
        for resource in expired.into_iter().chain(spilled) {
            if resource.usage().is_in_use(finished_submit) {
                requeue.push(resource);
            } else {
                resource.destroy(device);
                stats.destroyed += 1;
            }
        }

        stats.requeued = requeue.len();
        if !requeue.is_empty() {
            let mut state = self.state.lock();
            let current = state.current;
            state.lists[current].extend(requeue);
        }

        if stats.destroyed > 0 || stats.requeued > 0 {
            debug!(
                "Deletion sweep at submit {finished_submit}: {} destroyed, {} requeued",
                stats.destroyed, stats.requeued
            );
        }
        stats
    }

    /// Destroys every queued resource regardless of usage. Only valid once
    /// the device is idle.
    pub fn force_sweep(&self, device: &dyn GpuDevice) -> usize {
        let resources: Vec<DeferredResource> = {
            let mut state = self.state.lock();
            let mut resources = Vec::new();
            for list in state.lists.iter_mut() {
                resources.append(list);
            }
            resources.append(&mut state.spill);
            resources
        };

        let count = resources.len();
        for resource in resources {
            resource.destroy(device);
        }
        if count > 0 {
            debug!("Force-swept {count} deferred resources");
        }
        count
    }

    pub fn pending(&self) -> usize {
        let state = self.state.lock();
        state.lists.iter().map(Vec::len).sum::<usize>() + state.spill.len()
    }
}

impl Default for DeletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::{
        BufferDesc, BufferUsage, HeadlessDevice, MemoryHint, ObjectKind,
    };

    fn buffer(device: &HeadlessDevice) -> Arc<BufferResource> {
        let handle = device
            .create_buffer(&BufferDesc {
                size: 64,
                usage: BufferUsage::UNIFORM,
                memory: MemoryHint::CpuToGpu,
            })
            .unwrap();
        Arc::new(BufferResource::new(handle, 64))
    }

    #[test]
    fn idle_resources_wait_one_rotation() {
        let device = HeadlessDevice::new();
        let queue = DeletionQueue::new();
        queue
            .queue(DeferredResource::Buffer(buffer(&device)), 0, &device)
            .unwrap_or_else(|_| panic!("queue rejected resource"));

        // The first sweep examines the other, empty generation.
        assert_eq!(queue.sweep(0, &device).destroyed, 0);
        assert_eq!(device.live_count(ObjectKind::Buffer), 1);
        assert_eq!(queue.sweep(0, &device).destroyed, 1);
        assert_eq!(device.live_count(ObjectKind::Buffer), 0);
    }

    #[test]
    fn in_use_resources_are_requeued() {
        let device = HeadlessDevice::new();
        let queue = DeletionQueue::new();
        let resource = buffer(&device);
        resource.usage.mark_last_used(4);
        queue
            .queue(DeferredResource::Buffer(resource), 0, &device)
            .unwrap_or_else(|_| panic!("queue rejected resource"));

        queue.sweep(3, &device);
        let stats = queue.sweep(3, &device);
        assert_eq!(stats, SweepStats { destroyed: 0, requeued: 1 });
        assert_eq!(queue.pending(), 1);

        queue.sweep(4, &device);
        assert_eq!(queue.sweep(4, &device).destroyed, 1);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn force_sweep_ignores_usage() {
        let device = HeadlessDevice::new();
        let queue = DeletionQueue::new();
        let resource = buffer(&device);
        resource.usage.add_command_buffer_ref();
        queue
            .queue(DeferredResource::Buffer(resource), 0, &device)
            .unwrap_or_else(|_| panic!("queue rejected resource"));
        assert_eq!(queue.force_sweep(&device), 1);
        assert_eq!(device.live_count(ObjectKind::Buffer), 0);
    }
}
