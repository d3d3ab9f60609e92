//! The low-level device seam and its implementations.

pub mod ash_device;
pub mod capabilities;
pub mod device;
pub mod handles;
pub mod headless;
pub mod instance;
pub mod types;

pub use ash_device::AshDevice;
pub use capabilities::DeviceCapabilities;
pub use device::GpuDevice;
pub use handles::*;
pub use headless::{FenceCompletion, HeadlessDevice, ObjectKind, RecordedCommand};
pub use instance::VulkanInstance;
pub use types::*;
