use std::collections::HashSet;

use super::types::Format;

/// Immutable description of what the device can do.
///
/// Built once when the device is opened and shared by reference with every
/// component that has to validate against device limits.
#[derive(Clone, Debug)]
pub struct DeviceCapabilities {
    pub device_name: String,
    pub api_version: u32,
    /// Highest sample count usable for both colour and depth attachments.
    pub max_samples: u32,
    pub max_anisotropy: f32,
    pub max_push_constant_size: u32,
    pub supported_formats: HashSet<Format>,
    /// Whether pipelines may be created as derivatives of a base pipeline.
    pub derivative_pipelines: bool,
    pub debug_markers: bool,
    pub timestamp_period: f32,
}

impl DeviceCapabilities {
    pub fn supports_format(&self, format: Format) -> bool {
        format != Format::Undefined && self.supported_formats.contains(&format)
    }

    /// Rounds `samples` down to a power of two the device supports.
    pub fn clamp_samples(&self, samples: u32) -> u32 {
        let mut clamped = samples.clamp(1, self.max_samples.max(1));
        if !clamped.is_power_of_two() {
            clamped = 1 << (u32::BITS - 1 - clamped.leading_zeros());
        }
        clamped
    }

    pub fn clamp_anisotropy(&self, anisotropy: f32) -> f32 {
        anisotropy.clamp(1.0, self.max_anisotropy.max(1.0))
    }
}

impl Default for DeviceCapabilities {
    /// Capabilities of a conservative desktop-class device.
    fn default() -> Self {
        let supported_formats = [
            Format::R8G8B8A8Unorm,
            Format::R8G8B8A8Srgb,
            Format::B8G8R8A8Unorm,
            Format::B8G8R8A8Srgb,
            Format::R16G16B16A16Sfloat,
            Format::R32Sfloat,
            Format::R32G32Sfloat,
            Format::R32G32B32Sfloat,
            Format::R32G32B32A32Sfloat,
            Format::D16Unorm,
            Format::D24UnormS8Uint,
            Format::D32Sfloat,
        ]
        .into_iter()
        .collect();

        Self {
            device_name: "Headless Device".to_string(),
            api_version: ash::vk::API_VERSION_1_3,
            max_samples: 8,
            max_anisotropy: 16.0,
            max_push_constant_size: 128,
            supported_formats,
            derivative_pipelines: true,
            debug_markers: true,
            timestamp_period: 1.0,
        }
    }
}
