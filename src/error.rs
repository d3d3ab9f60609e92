use ash::vk;
use thiserror::Error;

use crate::vulkan::types::Format;

/// Errors produced by the lifecycle core and its device backends.
#[derive(Debug, Error)]
pub enum AshError {
    #[error("Vulkan error: {0}")]
    VulkanError(String),

    #[error("Device initialization failed: {0}")]
    DeviceInitFailed(String),

    /// Transient allocation failure. The caller skips the operation and
    /// may retry later.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Device lost")]
    DeviceLost,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Format {0:?} is not supported by the device")]
    FormatNotSupported(Format),

    #[error("Push constant size {size} exceeds device limit {max}")]
    PushConstantsTooLarge { size: u32, max: u32 },

    #[error("Invalid command buffer state: {0}")]
    InvalidState(String),

    #[error("Timed out waiting for the GPU")]
    Timeout,
}

impl AshError {
    /// Whether this error is a transient allocation failure.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, AshError::OutOfMemory(_))
    }
}

impl From<vk::Result> for AshError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => AshError::DeviceLost,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_OUT_OF_POOL_MEMORY
            | vk::Result::ERROR_FRAGMENTED_POOL => AshError::OutOfMemory(format!("{result:?}")),
            vk::Result::TIMEOUT => AshError::Timeout,
            other => AshError::VulkanError(format!("{other:?}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, AshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_results_map_to_taxonomy() {
        assert!(matches!(
            AshError::from(vk::Result::ERROR_DEVICE_LOST),
            AshError::DeviceLost
        ));
        assert!(AshError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).is_out_of_memory());
        assert!(matches!(
            AshError::from(vk::Result::ERROR_INITIALIZATION_FAILED),
            AshError::VulkanError(_)
        ));
    }
}
