use std::path::PathBuf;
use std::time::Duration;

/// Submit slots in the ring unless configured otherwise.
pub const DEFAULT_SUBMIT_SLOTS: usize = 3;

/// Frames a command buffer pool cycles through before reusing its memory.
pub const FRAME_DELAY: usize = 3;

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_COMMAND_BUFFER_CHUNK: u32 = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MsaaPreset {
    #[default]
    Off,
    X2,
    X4,
    X8,
}

impl MsaaPreset {
    pub fn sample_count(self) -> u32 {
        match self {
            MsaaPreset::Off => 1,
            MsaaPreset::X2 => 2,
            MsaaPreset::X4 => 4,
            MsaaPreset::X8 => 8,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RendererConfig {
    /// Initial default sample count for attachments that follow the
    /// renderer default.
    pub msaa: MsaaPreset,
    pub default_anisotropy: f32,
    pub submit_slots: usize,
    pub wait_timeout: Duration,
    /// Abort the process on device loss instead of returning
    /// `AshError::DeviceLost`.
    pub abort_on_device_loss: bool,
    pub pipeline_cache_path: Option<PathBuf>,
    pub command_buffer_chunk_size: u32,
    /// Scene recording workers. `None` uses the available parallelism.
    pub worker_threads: Option<usize>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            msaa: MsaaPreset::Off,
            default_anisotropy: 1.0,
            submit_slots: DEFAULT_SUBMIT_SLOTS,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            abort_on_device_loss: true,
            pipeline_cache_path: None,
            command_buffer_chunk_size: DEFAULT_COMMAND_BUFFER_CHUNK,
            worker_threads: None,
        }
    }
}

impl RendererConfig {
    pub fn with_msaa(mut self, msaa: MsaaPreset) -> Self {
        self.msaa = msaa;
        self
    }

    pub fn with_default_anisotropy(mut self, anisotropy: f32) -> Self {
        self.default_anisotropy = anisotropy;
        self
    }

    pub fn with_submit_slots(mut self, slots: usize) -> Self {
        self.submit_slots = slots;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_abort_on_device_loss(mut self, abort: bool) -> Self {
        self.abort_on_device_loss = abort;
        self
    }

    pub fn with_pipeline_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.pipeline_cache_path = Some(path.into());
        self
    }

    pub fn with_command_buffer_chunk_size(mut self, size: u32) -> Self {
        self.command_buffer_chunk_size = size;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = Some(threads);
        self
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msaa_presets_map_to_sample_counts() {
        assert_eq!(MsaaPreset::Off.sample_count(), 1);
        assert_eq!(MsaaPreset::X4.sample_count(), 4);
    }

    #[test]
    fn explicit_worker_count_wins() {
        let config = RendererConfig::default().with_worker_threads(3);
        assert_eq!(config.worker_count(), 3);
        assert!(RendererConfig::default().worker_count() >= 1);
    }
}
