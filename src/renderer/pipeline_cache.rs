use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::vulkan::{GpuDevice, PipelineCacheHandle};
use crate::{AshError, Result};

/// Driver pipeline cache with optional disk persistence.
///
/// The blob is opaque; it is loaded at creation and written back on drop.
pub struct PipelineCache {
    device: Arc<dyn GpuDevice>,
    cache: PipelineCacheHandle,
    cache_file: Option<PathBuf>,
}

impl PipelineCache {
    /// Creates a new pipeline cache without persistence.
    pub fn new(device: Arc<dyn GpuDevice>) -> Result<Self> {
        Self::with_persistence(device, None)
    }

    /// Creates a pipeline cache with optional disk persistence.
    ///
    /// If `cache_file` is provided, the cache will be loaded from disk on creation
    /// and saved to disk on drop.
    pub fn with_persistence(
        device: Arc<dyn GpuDevice>,
        cache_file: Option<PathBuf>,
    ) -> Result<Self> {
        let initial_data = cache_file
            .as_deref()
            .and_then(load_blob)
            .unwrap_or_default();

        let cache = match device.create_pipeline_cache(&initial_data) {
            Ok(cache) => cache,
            // A stale or foreign blob should not cost us the cache entirely.
            Err(err) if !initial_data.is_empty() => {
                log::warn!("Discarding unusable pipeline cache data: {err}");
                device.create_pipeline_cache(&[])?
            }
            Err(err) => return Err(err),
        };

        Ok(Self {
            device,
            cache,
            cache_file,
        })
    }

    pub fn handle(&self) -> PipelineCacheHandle {
        self.cache
    }

    pub fn path(&self) -> Option<&Path> {
        self.cache_file.as_deref()
    }

    pub fn get_data(&self) -> Result<Vec<u8>> {
        self.device.pipeline_cache_data(self.cache)
    }

    /// Saves the cache to disk (if persistence is enabled).
    pub fn save(&self) -> Result<()> {
        if let Some(ref path) = self.cache_file {
            let data = self.get_data()?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AshError::InvalidArgument(format!("Failed to create cache directory: {e}"))
                })?;
            }
            std::fs::write(path, &data).map_err(|e| {
                AshError::InvalidArgument(format!("Failed to write pipeline cache: {e}"))
            })?;
            log::info!(
                "Saved pipeline cache ({} bytes) to: {}",
                data.len(),
                path.display()
            );
        }
        Ok(())
    }
}

fn load_blob(path: &Path) -> Option<Vec<u8>> {
    if !path.exists() {
        log::debug!("No existing pipeline cache at: {}", path.display());
        return None;
    }
    match std::fs::read(path) {
        Ok(data) => {
            log::info!("Loaded pipeline cache from: {}", path.display());
            Some(data)
        }
        Err(e) => {
            log::warn!("Failed to load pipeline cache: {e}");
            None
        }
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        if self.cache_file.is_some() {
            if let Err(e) = self.save() {
                log::warn!("Failed to save pipeline cache on drop: {e}");
            }
        }
        self.device.destroy_pipeline_cache(self.cache);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::{HeadlessDevice, ObjectKind};

    #[test]
    fn cache_is_written_back_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("pipelines.bin");
        let device = Arc::new(HeadlessDevice::new());

        let cache =
            PipelineCache::with_persistence(
                Arc::clone(&device) as Arc<dyn GpuDevice>,
                Some(path.clone()),
            )
                .unwrap();
        assert_eq!(device.live_count(ObjectKind::PipelineCache), 1);
        drop(cache);

        assert!(path.exists());
        assert_eq!(device.live_count(ObjectKind::PipelineCache), 0);
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let device: Arc<dyn GpuDevice> = Arc::new(HeadlessDevice::new());
        let cache =
            PipelineCache::with_persistence(device, Some(dir.path().join("absent.bin"))).unwrap();
        assert!(!cache.handle().is_null());
    }
}
